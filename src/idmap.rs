// osal-core: Resource identity layer
// Per-type lifecycle tables, object tokens, and the transaction protocol
// that every primitive surface goes through

use std::sync::OnceLock;
use std::thread::{self, ThreadId};
use std::time::Duration;

use arrayvec::ArrayString;
use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::config;
use crate::error::{OsError, OsResult};
use crate::id::{object_id_to_array_index, ObjectId, ObjectType, ALL_OBJECT_TYPES};
use crate::task;

/// Fixed-capacity resource name as stored in the tables.
pub type ResourceName = ArrayString<{ config::MAX_API_NAME }>;

/// Bookkeeping common to every resource slot, regardless of type.
///
/// A slot is free iff `active_id` is `UNDEFINED`, mid-creation or
/// mid-deletion iff `active_id` is `RESERVED` (refcount must be zero in
/// that state), and active otherwise.
#[derive(Debug, Clone)]
pub struct CommonRecord {
    pub name: Option<ResourceName>,
    pub active_id: ObjectId,
    pub creator_id: ObjectId,
    pub refcount: u16,
}

impl CommonRecord {
    fn free() -> CommonRecord {
        CommonRecord {
            name: None,
            active_id: ObjectId::UNDEFINED,
            creator_id: ObjectId::UNDEFINED,
            refcount: 0,
        }
    }

    fn clear(&mut self) {
        *self = CommonRecord::free();
    }

    fn is_free(&self) -> bool {
        self.active_id == ObjectId::UNDEFINED
    }

    fn is_active(&self) -> bool {
        self.active_id.is_valid()
    }
}

/// How a token holds its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Validity check only; nothing held.
    None,
    /// Type table lock held; caller must release.
    Global,
    /// Slot refcount incremented, table lock released.
    Refcount,
    /// Slot reserved (`active_id` = RESERVED, refcount zero at entry),
    /// table lock released.  Caller must finalize or cancel.
    Exclusive,
    /// Continuation of an in-progress create/delete; table lock held.
    Reserved,
}

struct Gate {
    owner: Option<ThreadId>,
    depth: u32,
}

/// One lifecycle table per object type: a reentrant-capable lock, a
/// state-change condition, and the slot records.
///
/// The host mutex is not recursive, so reentrancy is provided by an
/// owner/depth wrapper.  The condition doubles as the lock-waiter queue
/// and the state-change broadcast channel.
struct TypeTable {
    gate: Mutex<Gate>,
    changed: Condvar,
    records: Mutex<Box<[CommonRecord]>>,
}

impl TypeTable {
    fn new(objtype: ObjectType) -> TypeTable {
        TypeTable {
            gate: Mutex::new(Gate {
                owner: None,
                depth: 0,
            }),
            changed: Condvar::new(),
            records: Mutex::new(
                (0..objtype.capacity())
                    .map(|_| CommonRecord::free())
                    .collect(),
            ),
        }
    }

    fn lock(&self) {
        let me = thread::current().id();
        let mut gate = self.gate.lock();
        if gate.owner == Some(me) {
            gate.depth += 1;
            return;
        }
        while gate.owner.is_some() {
            self.changed.wait(&mut gate);
        }
        gate.owner = Some(me);
        gate.depth = 1;
    }

    fn unlock(&self) {
        let mut gate = self.gate.lock();
        debug_assert_eq!(gate.owner, Some(thread::current().id()));
        gate.depth = gate.depth.saturating_sub(1);
        if gate.depth == 0 {
            gate.owner = None;
            self.changed.notify_all();
        }
    }

    /// Wake anyone polling for a record state change.  Callers hold the
    /// table lock when the change is made; the notification itself takes
    /// only the gate mutex.
    fn broadcast(&self) {
        self.changed.notify_all();
    }

    /// Release the table lock, sleep an amount quadratic in `attempts`
    /// (bounded), and reacquire.  A state-change broadcast cuts the sleep
    /// short.  The caller must own the lock.
    fn wait_for_state_change(&self, attempts: u32) {
        let wait_ms =
            (attempts as u64).saturating_mul(attempts as u64).min(config::STATE_CHANGE_MAX_WAIT_MS);
        let me = thread::current().id();
        let mut gate = self.gate.lock();
        debug_assert_eq!(gate.owner, Some(me));
        let depth = gate.depth;
        gate.owner = None;
        gate.depth = 0;
        self.changed.notify_all();

        let _ = self
            .changed
            .wait_for(&mut gate, Duration::from_millis(wait_ms.max(1)));

        while gate.owner.is_some() {
            self.changed.wait(&mut gate);
        }
        gate.owner = Some(me);
        gate.depth = depth;
    }

    fn with_records<R>(&self, f: impl FnOnce(&mut [CommonRecord]) -> R) -> R {
        f(&mut self.records.lock())
    }
}

static TABLES: OnceLock<[TypeTable; 13]> = OnceLock::new();

fn table(objtype: ObjectType) -> &'static TypeTable {
    let tables = TABLES.get_or_init(|| ALL_OBJECT_TYPES.map(TypeTable::new));
    &tables[objtype as usize - 1]
}

/// Transient handle tying a locked or reserved access to a table slot.
///
/// Dropping a token releases whatever it holds: the table lock for
/// `Global`/`Reserved`, the refcount for `Refcount`, and the reservation
/// for `Exclusive` (rolling the slot back).  The finalize functions
/// consume the token and commit instead.
pub struct Token {
    mode: LockMode,
    objtype: ObjectType,
    idx: usize,
    id: ObjectId,
    created: bool,
}

impl Token {
    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn index(&self) -> usize {
        self.idx
    }

    pub fn object_type(&self) -> ObjectType {
        self.objtype
    }

    pub fn lock_mode(&self) -> LockMode {
        self.mode
    }

    /// Disarm the token so Drop performs no release.
    fn defuse(mut self) {
        self.mode = LockMode::None;
    }
}

impl Drop for Token {
    fn drop(&mut self) {
        let tbl = table(self.objtype);
        match self.mode {
            LockMode::None => {}
            LockMode::Global | LockMode::Reserved => tbl.unlock(),
            LockMode::Refcount => {
                tbl.lock();
                let now_zero = tbl.with_records(|recs| {
                    let rec = &mut recs[self.idx];
                    rec.refcount = rec.refcount.saturating_sub(1);
                    rec.refcount == 0
                });
                if now_zero {
                    tbl.broadcast();
                }
                tbl.unlock();
            }
            LockMode::Exclusive => {
                // Cancel without a commit: a created slot rolls back to
                // free, a reserved lookup restores the previous id.
                tbl.lock();
                tbl.with_records(|recs| {
                    let rec = &mut recs[self.idx];
                    if self.created {
                        rec.clear();
                    } else {
                        rec.active_id = self.id;
                    }
                });
                tbl.broadcast();
                tbl.unlock();
            }
        }
    }
}

/// Release a token without committing anything.  Equivalent to dropping
/// it; provided for call sites where the release is the point.
pub fn release(token: Token) {
    drop(token);
}

fn validate_name(name: &str) -> OsResult<ResourceName> {
    ResourceName::from(name).map_err(|_| OsError::NameTooLong)
}

/// Reserve a free slot of `objtype` and associate it with `name`.
///
/// On success the slot is left in the RESERVED state and the table lock
/// is released, so the caller can perform lengthy host initialization
/// without blocking the type.  `finalize_new` must be called (on success
/// or failure) to commit or roll back.
pub fn allocate_new(objtype: ObjectType, name: Option<&str>) -> OsResult<Token> {
    let stored_name = match name {
        Some(n) => Some(validate_name(n)?),
        None => None,
    };

    let tbl = table(objtype);
    tbl.lock();

    let result = tbl.with_records(|recs| {
        if let Some(ref wanted) = stored_name {
            let taken = recs
                .iter()
                .any(|r| r.active_id.is_defined() && r.name.as_deref() == Some(wanted.as_str()));
            if taken {
                return Err(OsError::NameTaken);
            }
        }
        let idx = recs.iter().position(|r| r.is_free()).ok_or(OsError::NoFreeIds)?;
        let serial = objtype.serial_base() + idx as u32;
        let id = ObjectId::compose(objtype, serial);
        let rec = &mut recs[idx];
        rec.active_id = ObjectId::RESERVED;
        rec.creator_id = task::current_id();
        rec.name = stored_name;
        rec.refcount = 0;
        Ok((idx, id))
    });

    tbl.unlock();

    let (idx, id) = result?;
    Ok(Token {
        mode: LockMode::Exclusive,
        objtype,
        idx,
        id,
        created: true,
    })
}

/// Commit or roll back a creation started by `allocate_new`.
///
/// With an `Ok` operation status, the composed id becomes active and is
/// returned.  With an error status the slot is returned to the pool and
/// the error is propagated.  The state-change condition is broadcast
/// either way.
pub fn finalize_new(operation_status: OsResult<()>, token: Token) -> OsResult<ObjectId> {
    debug_assert_eq!(token.mode, LockMode::Exclusive);
    let tbl = table(token.objtype);
    tbl.lock();
    tbl.with_records(|recs| {
        let rec = &mut recs[token.idx];
        match operation_status {
            Ok(()) => rec.active_id = token.id,
            Err(_) => rec.clear(),
        }
    });
    tbl.broadcast();
    tbl.unlock();
    let id = token.id;
    token.defuse();
    operation_status.map(|_| id)
}

/// Commit or roll back a deletion for a slot held in `Exclusive` mode.
///
/// An `Ok` status frees the slot and clears its name; an error status
/// restores the previous active id, leaving the resource usable.
pub fn finalize_delete(operation_status: OsResult<()>, token: Token) -> OsResult<()> {
    debug_assert_eq!(token.mode, LockMode::Exclusive);
    let tbl = table(token.objtype);
    tbl.lock();
    tbl.with_records(|recs| {
        let rec = &mut recs[token.idx];
        match operation_status {
            Ok(()) => rec.clear(),
            Err(_) => rec.active_id = token.id,
        }
    });
    tbl.broadcast();
    tbl.unlock();
    token.defuse();
    operation_status
}

/// Look up a live resource by id and hold it in the requested mode.
///
/// Blocks (with quadratic backoff on the state-change condition) while an
/// `Exclusive` request waits for outstanding refcounts to drain, and for
/// a bounded number of rounds when the slot is observed mid-transition.
pub fn get_by_id(mode: LockMode, objtype: ObjectType, id: ObjectId) -> OsResult<Token> {
    let idx = object_id_to_array_index(objtype, id)?;
    let tbl = table(objtype);
    tbl.lock();

    let mut attempts: u32 = 0;
    loop {
        let (active, refcount) =
            tbl.with_records(|recs| (recs[idx].active_id, recs[idx].refcount));

        if active == ObjectId::RESERVED {
            if mode == LockMode::Reserved {
                // Continuation of an in-progress transition; lock retained.
                return Ok(Token {
                    mode: LockMode::Reserved,
                    objtype,
                    idx,
                    id,
                    created: false,
                });
            }
            // Mid-create or mid-delete by another task.  Give it a few
            // rounds to settle, then report the id unusable.
            attempts += 1;
            if attempts > 4 {
                tbl.unlock();
                return Err(OsError::InvalidId);
            }
            tbl.wait_for_state_change(attempts);
            continue;
        }

        if active != id {
            tbl.unlock();
            return Err(OsError::InvalidId);
        }

        match mode {
            LockMode::None => {
                tbl.unlock();
                return Ok(Token {
                    mode: LockMode::None,
                    objtype,
                    idx,
                    id,
                    created: false,
                });
            }
            LockMode::Global => {
                return Ok(Token {
                    mode: LockMode::Global,
                    objtype,
                    idx,
                    id,
                    created: false,
                });
            }
            LockMode::Refcount => {
                tbl.with_records(|recs| recs[idx].refcount += 1);
                tbl.unlock();
                return Ok(Token {
                    mode: LockMode::Refcount,
                    objtype,
                    idx,
                    id,
                    created: false,
                });
            }
            LockMode::Exclusive => {
                if refcount == 0 {
                    tbl.with_records(|recs| recs[idx].active_id = ObjectId::RESERVED);
                    tbl.unlock();
                    return Ok(Token {
                        mode: LockMode::Exclusive,
                        objtype,
                        idx,
                        id,
                        created: false,
                    });
                }
                // Borrowers outstanding; wait for the refcount to drain.
                attempts += 1;
                tbl.wait_for_state_change(attempts);
            }
            LockMode::Reserved => {
                // Slot is live, not reserved.
                tbl.unlock();
                return Err(OsError::InvalidId);
            }
        }
    }
}

/// Look up a live resource by an arbitrary record predicate.
pub fn get_by_search(
    mode: LockMode,
    objtype: ObjectType,
    predicate: impl Fn(&CommonRecord) -> bool,
) -> OsResult<Token> {
    let tbl = table(objtype);
    tbl.lock();
    let found = tbl.with_records(|recs| {
        recs.iter()
            .find(|r| r.is_active() && predicate(r))
            .map(|r| r.active_id)
    });
    tbl.unlock();
    match found {
        Some(id) => get_by_id(mode, objtype, id),
        None => Err(OsError::NameNotFound),
    }
}

/// Look up a live resource by name and hold it in the requested mode.
pub fn get_by_name(mode: LockMode, objtype: ObjectType, name: &str) -> OsResult<Token> {
    let wanted = validate_name(name)?;
    get_by_search(mode, objtype, move |rec| {
        rec.name.as_deref() == Some(wanted.as_str())
    })
}

/// Find the id associated with `name`, without holding anything.
pub fn find_by_name(objtype: ObjectType, name: &str) -> OsResult<ObjectId> {
    let wanted = validate_name(name)?;
    let tbl = table(objtype);
    tbl.lock();
    let found = tbl.with_records(|recs| {
        recs.iter()
            .find(|r| r.is_active() && r.name.as_deref() == Some(wanted.as_str()))
            .map(|r| r.active_id)
    });
    tbl.unlock();
    found.ok_or(OsError::NameNotFound)
}

/// Run `f` against the common record the token refers to.
///
/// The records mutex alone is held for the duration; the token's mode
/// guarantees the slot cannot change identity underneath the closure.
pub(crate) fn with_record<R>(token: &Token, f: impl FnOnce(&mut CommonRecord) -> R) -> R {
    table(token.objtype).with_records(|recs| f(&mut recs[token.idx]))
}

/// Read the common record for a live id under a transient refcount.
pub(crate) fn read_record(objtype: ObjectType, id: ObjectId) -> OsResult<CommonRecord> {
    let token = get_by_id(LockMode::Global, objtype, id)?;
    let rec = with_record(&token, |r| r.clone());
    drop(token);
    Ok(rec)
}

/// Walk the active slots of `objtype`, invoking `f` for each id.
///
/// The table lock is held for the walk but released around each callback
/// so the callback may reenter the API (including deleting the visited
/// object).  Every id passed to `f` was active at some point during the
/// call; ids created or deleted concurrently may or may not be visited.
pub fn iterate_active(objtype: ObjectType, mut f: impl FnMut(ObjectId)) {
    let tbl = table(objtype);
    tbl.lock();
    for idx in 0..objtype.capacity() {
        let id = tbl.with_records(|recs| {
            let rec = &recs[idx];
            if rec.is_active() {
                Some(rec.active_id)
            } else {
                None
            }
        });
        if let Some(id) = id {
            tbl.unlock();
            f(id);
            tbl.lock();
        }
    }
    tbl.unlock();
}

/// Walk active slots of one type, filtered by creator task.
///
/// An undefined `creator` matches every object.
pub fn for_each_object_of_type(
    objtype: ObjectType,
    creator: ObjectId,
    mut f: impl FnMut(ObjectId),
) {
    let tbl = table(objtype);
    tbl.lock();
    for idx in 0..objtype.capacity() {
        let id = tbl.with_records(|recs| {
            let rec = &recs[idx];
            let wanted = !creator.is_defined() || rec.creator_id == creator;
            if rec.is_active() && wanted {
                Some(rec.active_id)
            } else {
                None
            }
        });
        if let Some(id) = id {
            tbl.unlock();
            f(id);
            tbl.lock();
        }
    }
    tbl.unlock();
}

/// Walk active slots of every type, filtered by creator task.
pub fn for_each_object(creator: ObjectId, mut f: impl FnMut(ObjectId)) {
    for objtype in ALL_OBJECT_TYPES {
        for_each_object_of_type(objtype, creator, &mut f);
    }
}

/// Copy out the name of a live resource.  Nameless resources report an
/// empty string.
pub fn get_resource_name(id: ObjectId) -> OsResult<String> {
    let objtype = id.object_type().ok_or(OsError::InvalidId)?;
    let rec = read_record(objtype, id)?;
    Ok(rec.name.map(|n| n.to_string()).unwrap_or_default())
}

/// Usage snapshot for one object type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceCount {
    pub used: u32,
    pub total: u32,
}

/// Usage snapshot across every object type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceStats {
    pub tasks: ResourceCount,
    pub queues: ResourceCount,
    pub count_semaphores: ResourceCount,
    pub bin_semaphores: ResourceCount,
    pub mutexes: ResourceCount,
    pub streams: ResourceCount,
    pub dirs: ResourceCount,
    pub timebases: ResourceCount,
    pub timers: ResourceCount,
    pub modules: ResourceCount,
    pub filesystems: ResourceCount,
    pub consoles: ResourceCount,
    pub rwlocks: ResourceCount,
}

fn count_type(objtype: ObjectType) -> ResourceCount {
    let tbl = table(objtype);
    tbl.lock();
    let used = tbl.with_records(|recs| recs.iter().filter(|r| r.is_active()).count() as u32);
    tbl.unlock();
    ResourceCount {
        used,
        total: objtype.capacity() as u32,
    }
}

/// Snapshot `{used, total}` for each object type.  Slots mid-creation or
/// mid-deletion are not counted as used.
pub fn get_resource_stats() -> ResourceStats {
    ResourceStats {
        tasks: count_type(ObjectType::Task),
        queues: count_type(ObjectType::Queue),
        count_semaphores: count_type(ObjectType::CountSem),
        bin_semaphores: count_type(ObjectType::BinSem),
        mutexes: count_type(ObjectType::Mutex),
        streams: count_type(ObjectType::Stream),
        dirs: count_type(ObjectType::Dir),
        timebases: count_type(ObjectType::TimeBase),
        timers: count_type(ObjectType::TimeCb),
        modules: count_type(ObjectType::Module),
        filesystems: count_type(ObjectType::FileSys),
        consoles: count_type(ObjectType::Console),
        rwlocks: count_type(ObjectType::RwLock),
    }
}

/// Log and swallow a failure on a path with nowhere to report it.
pub(crate) fn log_nonfatal(context: &str, err: OsError) {
    debug!(context, %err, "non-recoverable internal failure");
}

#[cfg(test)]
mod tests {
    use super::*;

    // These tests use the Module table; other suites leave it alone.

    #[test]
    fn test_allocate_finalize_find() {
        let token = allocate_new(ObjectType::Module, Some("idmap_basic")).unwrap();
        let id = finalize_new(Ok(()), token).unwrap();
        assert!(id.is_valid());
        assert_eq!(id.object_type(), Some(ObjectType::Module));

        assert_eq!(find_by_name(ObjectType::Module, "idmap_basic").unwrap(), id);
        assert_eq!(get_resource_name(id).unwrap(), "idmap_basic");

        let token = get_by_id(LockMode::Exclusive, ObjectType::Module, id).unwrap();
        finalize_delete(Ok(()), token).unwrap();
        assert_eq!(
            find_by_name(ObjectType::Module, "idmap_basic"),
            Err(OsError::NameNotFound)
        );
        assert_eq!(get_by_id(LockMode::None, ObjectType::Module, id).err(), Some(OsError::InvalidId));
    }

    #[test]
    fn test_duplicate_name_rejected_then_released() {
        let token = allocate_new(ObjectType::Module, Some("idmap_dup")).unwrap();
        let id = finalize_new(Ok(()), token).unwrap();

        assert_eq!(
            allocate_new(ObjectType::Module, Some("idmap_dup")).err(),
            Some(OsError::NameTaken)
        );

        let token = get_by_id(LockMode::Exclusive, ObjectType::Module, id).unwrap();
        finalize_delete(Ok(()), token).unwrap();

        // Name is reusable after deletion.
        let token = allocate_new(ObjectType::Module, Some("idmap_dup")).unwrap();
        let id2 = finalize_new(Ok(()), token).unwrap();
        let token = get_by_id(LockMode::Exclusive, ObjectType::Module, id2).unwrap();
        finalize_delete(Ok(()), token).unwrap();
    }

    #[test]
    fn test_failed_creation_rolls_back() {
        let token = allocate_new(ObjectType::Module, Some("idmap_fail")).unwrap();
        let err = finalize_new(Err(OsError::SemFailure), token);
        assert_eq!(err, Err(OsError::SemFailure));
        assert_eq!(
            find_by_name(ObjectType::Module, "idmap_fail"),
            Err(OsError::NameNotFound)
        );

        // The slot and name both returned to the pool.
        let token = allocate_new(ObjectType::Module, Some("idmap_fail")).unwrap();
        let id = finalize_new(Ok(()), token).unwrap();
        let token = get_by_id(LockMode::Exclusive, ObjectType::Module, id).unwrap();
        finalize_delete(Ok(()), token).unwrap();
    }

    #[test]
    fn test_name_too_long_boundary() {
        let exact = "a".repeat(config::MAX_API_NAME);
        let over = "a".repeat(config::MAX_API_NAME + 1);

        let token = allocate_new(ObjectType::Module, Some(&exact)).unwrap();
        let id = finalize_new(Ok(()), token).unwrap();
        assert_eq!(
            allocate_new(ObjectType::Module, Some(&over)).err(),
            Some(OsError::NameTooLong)
        );
        assert_eq!(find_by_name(ObjectType::Module, &over).err(), Some(OsError::NameTooLong));

        let token = get_by_id(LockMode::Exclusive, ObjectType::Module, id).unwrap();
        finalize_delete(Ok(()), token).unwrap();
    }

    #[test]
    fn test_refcount_blocks_exclusive() {
        let token = allocate_new(ObjectType::Module, Some("idmap_ref")).unwrap();
        let id = finalize_new(Ok(()), token).unwrap();

        let held = get_by_id(LockMode::Refcount, ObjectType::Module, id).unwrap();
        assert_eq!(with_record(&held, |r| r.refcount), 1);

        // Deleter blocks until the borrower lets go.
        let deleter = std::thread::spawn(move || {
            let token = get_by_id(LockMode::Exclusive, ObjectType::Module, id).unwrap();
            finalize_delete(Ok(()), token)
        });
        std::thread::sleep(Duration::from_millis(50));
        assert!(!deleter.is_finished());

        release(held);
        assert_eq!(deleter.join().unwrap(), Ok(()));
    }

    #[test]
    fn test_token_drop_rolls_back_reservation() {
        {
            let _token = allocate_new(ObjectType::Module, Some("idmap_drop")).unwrap();
            // Dropped without finalize.
        }
        assert_eq!(
            find_by_name(ObjectType::Module, "idmap_drop"),
            Err(OsError::NameNotFound)
        );

        // The reservation rolled back; the name allocates cleanly again.
        let token = allocate_new(ObjectType::Module, Some("idmap_drop")).unwrap();
        let id = finalize_new(Ok(()), token).unwrap();
        let token = get_by_id(LockMode::Exclusive, ObjectType::Module, id).unwrap();
        finalize_delete(Ok(()), token).unwrap();
    }

    #[test]
    fn test_reserved_mode_continues_in_progress_creation() {
        let token = allocate_new(ObjectType::Module, Some("idmap_resv")).unwrap();
        let in_flight = token.id();

        // While the slot is reserved, normal lookups reject it but a
        // Reserved-mode continuation picks it up.
        let cont = get_by_id(LockMode::Reserved, ObjectType::Module, in_flight).unwrap();
        assert_eq!(cont.lock_mode(), LockMode::Reserved);
        assert_eq!(cont.index(), token.index());
        drop(cont);

        let id = finalize_new(Ok(()), token).unwrap();
        assert_eq!(id, in_flight);

        let token = get_by_id(LockMode::Exclusive, ObjectType::Module, id).unwrap();
        finalize_delete(Ok(()), token).unwrap();
    }

    #[test]
    fn test_iterate_visits_active() {
        let token = allocate_new(ObjectType::Module, Some("idmap_iter")).unwrap();
        let id = finalize_new(Ok(()), token).unwrap();

        let mut seen = Vec::new();
        iterate_active(ObjectType::Module, |visited| seen.push(visited));
        assert!(seen.contains(&id));

        let token = get_by_id(LockMode::Exclusive, ObjectType::Module, id).unwrap();
        finalize_delete(Ok(()), token).unwrap();
    }

    #[test]
    fn test_delete_from_iteration_callback() {
        let token = allocate_new(ObjectType::Module, Some("idmap_reenter")).unwrap();
        let id = finalize_new(Ok(()), token).unwrap();

        iterate_active(ObjectType::Module, |visited| {
            if visited == id {
                let token = get_by_id(LockMode::Exclusive, ObjectType::Module, id).unwrap();
                finalize_delete(Ok(()), token).unwrap();
            }
        });
        assert_eq!(get_by_id(LockMode::None, ObjectType::Module, id).err(), Some(OsError::InvalidId));
    }
}
