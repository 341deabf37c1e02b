// osal-core: Binary semaphore API
//
// The host provides no native VxWorks-style binary semaphore, so the
// semantics are simulated with a mutex/condvar pair and a small amount of
// internal state per semaphore.  Side effect: binary semaphores are not
// usable from signal handlers; use counting semaphores there.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::config;
use crate::error::{OsError, OsResult};
use crate::id::{ObjectId, ObjectType};
use crate::idmap::{self, LockMode};

struct BinSemSlot {
    lock: Mutex<BinSemState>,
    cond: Condvar,
}

#[derive(Default)]
struct BinSemState {
    /// Semaphore value, always 0 or 1.
    value: u32,
    /// Incremented by flush.  A pending take that observes the counter
    /// move returns without touching the value.
    flush_counter: u32,
    /// Tasks currently pending inside take.
    waiters: u32,
}

static IMPL: OnceLock<Vec<BinSemSlot>> = OnceLock::new();

fn impl_table() -> &'static [BinSemSlot] {
    IMPL.get_or_init(|| {
        (0..config::MAX_BIN_SEMAPHORES)
            .map(|_| BinSemSlot {
                lock: Mutex::new(BinSemState::default()),
                cond: Condvar::new(),
            })
            .collect()
    })
}

/// Properties reported by `get_info`.
#[derive(Debug, Clone)]
pub struct BinSemProp {
    pub name: String,
    pub creator: ObjectId,
    pub value: u32,
}

/// Create a binary semaphore with the given initial value.
///
/// Initial values greater than 1 are silently reduced to 1; this
/// preserves long-standing behavior particular to binary semaphores
/// (counting semaphores reject out-of-range values instead).
pub fn create(name: &str, initial_value: u32, _options: u32) -> OsResult<ObjectId> {
    let token = idmap::allocate_new(ObjectType::BinSem, Some(name))?;

    let slot = &impl_table()[token.index()];
    {
        let mut state = slot.lock.lock();
        *state = BinSemState {
            value: initial_value.min(1),
            ..BinSemState::default()
        };
    }

    idmap::finalize_new(Ok(()), token)
}

/// Delete a binary semaphore.
///
/// If any task is pending on the semaphore it cannot be deleted; the
/// call fails with `SemFailure` and the semaphore remains usable.
pub fn delete(sem_id: ObjectId) -> OsResult<()> {
    let guard = idmap::get_by_id(LockMode::Global, ObjectType::BinSem, sem_id)?;
    let busy = impl_table()[guard.index()].lock.lock().waiters > 0;
    drop(guard);
    if busy {
        return Err(OsError::SemFailure);
    }

    let token = idmap::get_by_id(LockMode::Exclusive, ObjectType::BinSem, sem_id)?;
    idmap::finalize_delete(Ok(()), token)
}

/// Set the semaphore and wake one pending task.
///
/// The per-semaphore lock must be taken here even though a native binary
/// semaphore would not need it: a concurrent taker may have checked the
/// value but not yet entered its wait, and signalling outside the lock
/// would lose that wakeup.
pub fn give(sem_id: ObjectId) -> OsResult<()> {
    let token = idmap::get_by_id(LockMode::Refcount, ObjectType::BinSem, sem_id)?;
    let slot = &impl_table()[token.index()];
    {
        let mut state = slot.lock.lock();
        state.value = 1;
        slot.cond.notify_one();
    }
    idmap::release(token);
    Ok(())
}

/// Release every pending task without modifying the semaphore value.
pub fn flush(sem_id: ObjectId) -> OsResult<()> {
    let token = idmap::get_by_id(LockMode::Refcount, ObjectType::BinSem, sem_id)?;
    let slot = &impl_table()[token.index()];
    {
        let mut state = slot.lock.lock();
        state.flush_counter = state.flush_counter.wrapping_add(1);
        slot.cond.notify_all();
    }
    idmap::release(token);
    Ok(())
}

/// Shared body for pend and timed take.
///
/// A taker must return under two circumstances: the value became nonzero
/// (normal case, the value is consumed), or the semaphore was flushed
/// (all takers released, value untouched).  The flush case is detected
/// by snapshotting the flush counter before waiting.
fn generic_take(sem_id: ObjectId, deadline: Option<Instant>) -> OsResult<()> {
    let token = idmap::get_by_id(LockMode::Refcount, ObjectType::BinSem, sem_id)?;
    let slot = &impl_table()[token.index()];

    let result = {
        let mut state = slot.lock.lock();
        let flush_snapshot = state.flush_counter;
        state.waiters += 1;

        let mut result = Ok(());
        while state.value == 0 && state.flush_counter == flush_snapshot {
            match deadline {
                None => slot.cond.wait(&mut state),
                Some(deadline) => {
                    if slot.cond.wait_until(&mut state, deadline).timed_out() {
                        result = Err(OsError::SemTimeout);
                        break;
                    }
                }
            }
        }

        if result.is_ok() && state.flush_counter == flush_snapshot {
            state.value = 0;
        }
        state.waiters -= 1;
        result
        // MutexGuard drops here, releasing the semaphore lock on every
        // exit path, including unwinding.
    };

    idmap::release(token);
    result
}

/// Take the semaphore, pending until it is given or flushed.
pub fn take(sem_id: ObjectId) -> OsResult<()> {
    generic_take(sem_id, None)
}

/// Take the semaphore, pending no longer than `msecs` milliseconds.
/// A zero timeout polls: it returns `SemTimeout` immediately when the
/// value is zero and no flush intervenes.
pub fn timed_wait(sem_id: ObjectId, msecs: u32) -> OsResult<()> {
    let deadline = Instant::now() + Duration::from_millis(u64::from(msecs));
    generic_take(sem_id, Some(deadline))
}

/// Find a binary semaphore by name.
pub fn get_id_by_name(name: &str) -> OsResult<ObjectId> {
    idmap::find_by_name(ObjectType::BinSem, name)
}

/// Report the name, creator, and current value of a semaphore.
pub fn get_info(sem_id: ObjectId) -> OsResult<BinSemProp> {
    let token = idmap::get_by_id(LockMode::Global, ObjectType::BinSem, sem_id)?;
    let (name, creator) = idmap::with_record(&token, |rec| {
        (
            rec.name.map(|n| n.to_string()).unwrap_or_default(),
            rec.creator_id,
        )
    });
    let value = impl_table()[token.index()].lock.lock().value;
    drop(token);
    Ok(BinSemProp {
        name,
        creator,
        value,
    })
}
