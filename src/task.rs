// osal-core: Task API
//
// Tasks are host threads tracked through the identity layer.  A
// thread-local slot carries the task id of the running thread; the spawn
// wrapper installs it before the entry function runs.
//
// The host has no asynchronous thread cancellation, so deleting a task
// retires its identity and detaches the underlying thread; the entry
// function itself ends only by returning.

use std::cell::Cell;
use std::sync::OnceLock;
use std::thread::{self, ThreadId};
use std::time::Duration;

use bitflags::bitflags;
use parking_lot::Mutex;
use tracing::debug;

use crate::config;
use crate::error::{OsError, OsResult};
use crate::host;
use crate::id::{ObjectId, ObjectType};
use crate::idmap::{self, LockMode};

bitflags! {
    /// Task creation options.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TaskFlags: u32 {
        /// Task uses floating point; kept for interface compatibility,
        /// every thread on this host may use the FPU.
        const FLOATING_POINT = 0x01;
    }
}

thread_local! {
    static CURRENT_TASK: Cell<ObjectId> = const { Cell::new(ObjectId::UNDEFINED) };
}

/// Task id of the calling thread, or `UNDEFINED` when the caller is not
/// an OSAL task.
pub(crate) fn current_id() -> ObjectId {
    CURRENT_TASK.with(|c| c.get())
}

struct TaskSlot {
    state: Mutex<TaskState>,
}

#[derive(Default)]
struct TaskState {
    priority: u8,
    stack_size: usize,
    flags: TaskFlags,
    sys_id: Option<ThreadId>,
    join: Option<thread::JoinHandle<()>>,
    detached: bool,
}

static IMPL: OnceLock<Vec<TaskSlot>> = OnceLock::new();

fn impl_table() -> &'static [TaskSlot] {
    IMPL.get_or_init(|| {
        (0..config::MAX_TASKS)
            .map(|_| TaskSlot {
                state: Mutex::new(TaskState::default()),
            })
            .collect()
    })
}

/// Properties reported by `get_info`.
#[derive(Debug, Clone)]
pub struct TaskProp {
    pub name: String,
    pub creator: ObjectId,
    pub stack_size: usize,
    pub priority: u8,
}

/// Spawn a task running `entry`.
///
/// A `stack_size` of zero selects the host default.  The priority is
/// recorded and surfaced through `get_info`; whether the host scheduler
/// honors it is a host capability.
pub fn create(
    name: &str,
    entry: impl FnOnce() + Send + 'static,
    stack_size: usize,
    priority: u8,
    flags: TaskFlags,
) -> OsResult<ObjectId> {
    let token = idmap::allocate_new(ObjectType::Task, Some(name))?;
    let idx = token.index();
    let id = token.id();

    {
        let mut state = impl_table()[idx].state.lock();
        *state = TaskState {
            priority,
            stack_size: if stack_size == 0 {
                config::DEFAULT_STACK_SIZE
            } else {
                stack_size
            },
            flags,
            ..TaskState::default()
        };
    }

    let effective_stack = impl_table()[idx].state.lock().stack_size;
    let spawn_result = thread::Builder::new()
        .name(name.to_string())
        .stack_size(effective_stack)
        .spawn(move || {
            CURRENT_TASK.with(|c| c.set(id));
            impl_table()[idx].state.lock().sys_id = Some(thread::current().id());
            entry();
            // Entry returned; retire the identity if it still exists and
            // still belongs to this thread.
            let _ = remove_identity_owned(id);
        });

    match spawn_result {
        Ok(handle) => {
            impl_table()[idx].state.lock().join = Some(handle);
            idmap::finalize_new(Ok(()), token)
        }
        Err(err) => {
            debug!(%err, "host thread spawn failed");
            let _ = idmap::finalize_new(Err(OsError::Error), token);
            Err(OsError::Error)
        }
    }
}

fn remove_identity(task_id: ObjectId) -> OsResult<()> {
    let token = idmap::get_by_id(LockMode::Exclusive, ObjectType::Task, task_id)?;
    {
        let mut state = impl_table()[token.index()].state.lock();
        // Dropping the join handle detaches the thread.
        *state = TaskState::default();
    }
    idmap::finalize_delete(Ok(()), token)
}

/// Retire a task identity only if the slot still belongs to the calling
/// thread.  A deleted task's slot may be reissued under the same id, so
/// the late self-retirement from the spawn wrapper must not take someone
/// else's identity with it.
fn remove_identity_owned(task_id: ObjectId) -> OsResult<()> {
    let token = idmap::get_by_id(LockMode::Exclusive, ObjectType::Task, task_id)?;
    let mine =
        impl_table()[token.index()].state.lock().sys_id == Some(thread::current().id());
    if !mine {
        // Dropping the token restores the record untouched.
        return Err(OsError::InvalidId);
    }
    {
        let mut state = impl_table()[token.index()].state.lock();
        *state = TaskState::default();
    }
    idmap::finalize_delete(Ok(()), token)
}

/// Delete a task's identity.
///
/// The underlying host thread is detached, not killed; it ends when its
/// entry function returns.  Deleting the calling task is equivalent to
/// `exit`.
pub fn delete(task_id: ObjectId) -> OsResult<()> {
    if task_id == current_id() {
        exit();
        return Ok(());
    }
    remove_identity(task_id)
}

/// Retire the calling task's identity.
///
/// Unlike a hosted RTOS this cannot tear down the thread itself; the
/// entry function should return promptly after calling this.
pub fn exit() {
    let id = current_id();
    if id.is_defined() {
        CURRENT_TASK.with(|c| c.set(ObjectId::UNDEFINED));
        if let Err(err) = remove_identity_owned(id) {
            idmap::log_nonfatal("task exit", err);
        }
    }
}

/// Suspend the calling thread for `millis` milliseconds.
pub fn delay(millis: u32) -> OsResult<()> {
    thread::sleep(Duration::from_millis(u64::from(millis)));
    Ok(())
}

/// Update a task's recorded priority.
///
/// On hosts without priority scheduling the value is bookkeeping only.
pub fn set_priority(task_id: ObjectId, new_priority: u8) -> OsResult<()> {
    let token = idmap::get_by_id(LockMode::Global, ObjectType::Task, task_id)?;
    impl_table()[token.index()].state.lock().priority = new_priority;
    drop(token);
    if !host::capabilities().priority_scheduling {
        debug!(
            id = %task_id,
            priority = new_priority,
            "priority recorded; host scheduler does not honor it"
        );
    }
    Ok(())
}

/// Bind the calling thread to its task identity.
///
/// Threads spawned through `create` are bound automatically; a thread
/// that lost its binding (or was created by the host before the table
/// entry finalized) can re-associate by system id.
pub fn register() -> OsResult<()> {
    if current_id().is_defined() {
        return Ok(());
    }
    let me = thread::current().id();
    let found = find_id_by_system_data(&me)?;
    CURRENT_TASK.with(|c| c.set(found));
    Ok(())
}

/// Task id of the calling thread.  `UNDEFINED` when called from a thread
/// not created through this API.
pub fn get_id() -> ObjectId {
    current_id()
}

/// Find a task by name.
pub fn get_id_by_name(name: &str) -> OsResult<ObjectId> {
    idmap::find_by_name(ObjectType::Task, name)
}

/// Report the recorded properties of a task.
pub fn get_info(task_id: ObjectId) -> OsResult<TaskProp> {
    let token = idmap::get_by_id(LockMode::Global, ObjectType::Task, task_id)?;
    let (name, creator) = idmap::with_record(&token, |rec| {
        (
            rec.name.map(|n| n.to_string()).unwrap_or_default(),
            rec.creator_id,
        )
    });
    let state = impl_table()[token.index()].state.lock();
    let prop = TaskProp {
        name,
        creator,
        stack_size: state.stack_size,
        priority: state.priority,
    };
    drop(state);
    drop(token);
    Ok(prop)
}

/// True when `task_id` was created on the thread identified by
/// `sys_data`.
pub fn id_match_system_data(task_id: ObjectId, sys_data: &ThreadId) -> OsResult<bool> {
    let token = idmap::get_by_id(LockMode::Global, ObjectType::Task, task_id)?;
    let matches = impl_table()[token.index()].state.lock().sys_id == Some(*sys_data);
    drop(token);
    Ok(matches)
}

/// True when `task_id` refers to the calling task, i.e. the task's
/// recorded host thread is the current thread.
pub fn is_current(task_id: ObjectId) -> OsResult<bool> {
    id_match_system_data(task_id, &thread::current().id())
}

/// Validate host-level thread identification data.  Thread ids on this
/// host are well-formed by construction.
pub fn validate_system_data(_sys_data: &ThreadId) -> OsResult<()> {
    Ok(())
}

/// Find the task whose underlying thread matches `sys_data`.
pub fn find_id_by_system_data(sys_data: &ThreadId) -> OsResult<ObjectId> {
    let mut found = ObjectId::UNDEFINED;
    idmap::iterate_active(ObjectType::Task, |id| {
        if !found.is_defined() {
            if let Ok(true) = id_match_system_data(id, sys_data) {
                found = id;
            }
        }
    });
    if found.is_defined() {
        Ok(found)
    } else {
        Err(OsError::InvalidId)
    }
}

/// Detach a task so its thread is not joined at deletion.
pub fn detach(task_id: ObjectId) -> OsResult<()> {
    let token = idmap::get_by_id(LockMode::Global, ObjectType::Task, task_id)?;
    {
        let mut state = impl_table()[token.index()].state.lock();
        state.join = None;
        state.detached = true;
    }
    drop(token);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Arc;

    fn wait_until(cond: impl Fn() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("condition not reached in time");
    }

    #[test]
    fn test_task_runs_and_retires() {
        let ran = Arc::new(AtomicU32::new(0));
        let ran2 = Arc::clone(&ran);
        let id = create(
            "tk_basic",
            move || {
                ran2.fetch_add(1, Ordering::SeqCst);
            },
            0,
            100,
            TaskFlags::empty(),
        )
        .unwrap();
        assert!(id.is_valid());

        wait_until(|| ran.load(Ordering::SeqCst) == 1);
        // Identity retires itself once the entry returns.
        wait_until(|| get_info(id).is_err());
    }

    #[test]
    fn test_get_id_inside_task() {
        let observed = Arc::new(AtomicU32::new(0));
        let observed2 = Arc::clone(&observed);
        let stop = Arc::new(AtomicBool::new(false));
        let stop2 = Arc::clone(&stop);

        let id = create(
            "tk_selfid",
            move || {
                observed2.store(get_id().as_raw(), Ordering::SeqCst);
                while !stop2.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(5));
                }
            },
            0,
            50,
            TaskFlags::empty(),
        )
        .unwrap();

        wait_until(|| observed.load(Ordering::SeqCst) != 0);
        assert_eq!(observed.load(Ordering::SeqCst), id.as_raw());

        let prop = get_info(id).unwrap();
        assert_eq!(prop.name, "tk_selfid");
        assert_eq!(prop.priority, 50);
        assert_eq!(get_id_by_name("tk_selfid").unwrap(), id);

        stop.store(true, Ordering::SeqCst);
        wait_until(|| get_info(id).is_err());
    }

    #[test]
    fn test_set_priority_updates_record() {
        let stop = Arc::new(AtomicBool::new(false));
        let stop2 = Arc::clone(&stop);
        let id = create(
            "tk_prio",
            move || {
                while !stop2.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(5));
                }
            },
            0,
            10,
            TaskFlags::empty(),
        )
        .unwrap();

        set_priority(id, 200).unwrap();
        assert_eq!(get_info(id).unwrap().priority, 200);

        stop.store(true, Ordering::SeqCst);
        wait_until(|| get_info(id).is_err());
    }

    #[test]
    fn test_is_current_inside_and_outside_task() {
        let matched = Arc::new(AtomicU32::new(0));
        let matched2 = Arc::clone(&matched);
        let stop = Arc::new(AtomicBool::new(false));
        let stop2 = Arc::clone(&stop);

        let id = create(
            "tk_iscur",
            move || {
                if is_current(get_id()).unwrap_or(false) {
                    matched2.store(1, Ordering::SeqCst);
                }
                while !stop2.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(5));
                }
            },
            0,
            50,
            TaskFlags::empty(),
        )
        .unwrap();

        wait_until(|| matched.load(Ordering::SeqCst) == 1);
        // The same id is not current on the test thread.
        assert_eq!(is_current(id), Ok(false));

        stop.store(true, Ordering::SeqCst);
        wait_until(|| get_info(id).is_err());
    }

    #[test]
    fn test_delete_foreign_task_identity() {
        let stop = Arc::new(AtomicBool::new(false));
        let stop2 = Arc::clone(&stop);
        let id = create(
            "tk_delete",
            move || {
                while !stop2.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(5));
                }
            },
            0,
            10,
            TaskFlags::empty(),
        )
        .unwrap();

        delete(id).unwrap();
        assert_eq!(get_info(id).err(), Some(OsError::InvalidId));
        // The detached thread winds down on its own.
        stop.store(true, Ordering::SeqCst);
    }

    #[test]
    fn test_delay_sleeps() {
        let start = std::time::Instant::now();
        delay(20).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(15));
    }
}
