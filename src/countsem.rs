// osal-core: Counting semaphore API
//
// Thin layer over the host's counted wait facility.  Unlike the binary
// semaphore there is no flush operation, and out-of-range initial values
// are rejected rather than clamped.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::config;
use crate::error::{OsError, OsResult};
use crate::id::{ObjectId, ObjectType};
use crate::idmap::{self, LockMode};

struct CountSemSlot {
    lock: Mutex<CountSemState>,
    cond: Condvar,
}

#[derive(Default)]
struct CountSemState {
    value: u32,
    waiters: u32,
}

static IMPL: OnceLock<Vec<CountSemSlot>> = OnceLock::new();

fn impl_table() -> &'static [CountSemSlot] {
    IMPL.get_or_init(|| {
        (0..config::MAX_COUNT_SEMAPHORES)
            .map(|_| CountSemSlot {
                lock: Mutex::new(CountSemState::default()),
                cond: Condvar::new(),
            })
            .collect()
    })
}

/// Properties reported by `get_info`.
#[derive(Debug, Clone)]
pub struct CountSemProp {
    pub name: String,
    pub creator: ObjectId,
    pub value: u32,
}

/// Create a counting semaphore with the given initial value.
pub fn create(name: &str, initial_value: u32, _options: u32) -> OsResult<ObjectId> {
    if initial_value > config::SEM_VALUE_MAX {
        return Err(OsError::InvalidSemValue);
    }

    let token = idmap::allocate_new(ObjectType::CountSem, Some(name))?;
    {
        let mut state = impl_table()[token.index()].lock.lock();
        *state = CountSemState {
            value: initial_value,
            waiters: 0,
        };
    }
    idmap::finalize_new(Ok(()), token)
}

/// Delete a counting semaphore.  Fails with `SemFailure` while tasks are
/// pending on it.
pub fn delete(sem_id: ObjectId) -> OsResult<()> {
    let guard = idmap::get_by_id(LockMode::Global, ObjectType::CountSem, sem_id)?;
    let busy = impl_table()[guard.index()].lock.lock().waiters > 0;
    drop(guard);
    if busy {
        return Err(OsError::SemFailure);
    }

    let token = idmap::get_by_id(LockMode::Exclusive, ObjectType::CountSem, sem_id)?;
    idmap::finalize_delete(Ok(()), token)
}

/// Increment the semaphore and wake one pending task.  Never blocks;
/// incrementing past the configured maximum fails with `SemFailure`.
pub fn give(sem_id: ObjectId) -> OsResult<()> {
    let token = idmap::get_by_id(LockMode::Refcount, ObjectType::CountSem, sem_id)?;
    let slot = &impl_table()[token.index()];
    let result = {
        let mut state = slot.lock.lock();
        if state.value >= config::SEM_VALUE_MAX {
            Err(OsError::SemFailure)
        } else {
            state.value += 1;
            slot.cond.notify_one();
            Ok(())
        }
    };
    idmap::release(token);
    result
}

fn generic_take(sem_id: ObjectId, deadline: Option<Instant>) -> OsResult<()> {
    let token = idmap::get_by_id(LockMode::Refcount, ObjectType::CountSem, sem_id)?;
    let slot = &impl_table()[token.index()];

    let result = {
        let mut state = slot.lock.lock();
        state.waiters += 1;

        let mut result = Ok(());
        while state.value == 0 {
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
        if result.is_ok() {
            state.value -= 1;
        }
        state.waiters -= 1;
        result
    };

    idmap::release(token);
    result
}

/// Decrement the semaphore, pending until the value is nonzero.
pub fn take(sem_id: ObjectId) -> OsResult<()> {
    generic_take(sem_id, None)
}

/// Decrement the semaphore, pending no longer than `msecs` milliseconds.
pub fn timed_wait(sem_id: ObjectId, msecs: u32) -> OsResult<()> {
    let deadline = Instant::now() + Duration::from_millis(u64::from(msecs));
    generic_take(sem_id, Some(deadline))
}

/// Find a counting semaphore by name.
pub fn get_id_by_name(name: &str) -> OsResult<ObjectId> {
    idmap::find_by_name(ObjectType::CountSem, name)
}

/// Report the name, creator, and current value of a semaphore.
pub fn get_info(sem_id: ObjectId) -> OsResult<CountSemProp> {
    let token = idmap::get_by_id(LockMode::Global, ObjectType::CountSem, sem_id)?;
    let (name, creator) = idmap::with_record(&token, |rec| {
        (
            rec.name.map(|n| n.to_string()).unwrap_or_default(),
            rec.creator_id,
        )
    });
    let value = impl_table()[token.index()].lock.lock().value;
    drop(token);
    Ok(CountSemProp {
        name,
        creator,
        value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_rejects_oversize_value() {
        assert_eq!(
            create("cs_over", config::SEM_VALUE_MAX + 1, 0),
            Err(OsError::InvalidSemValue)
        );
    }

    #[test]
    fn test_counted_give_take() {
        let id = create("cs_count", 2, 0).unwrap();
        assert_eq!(take(id), Ok(()));
        assert_eq!(take(id), Ok(()));
        assert_eq!(timed_wait(id, 0), Err(OsError::SemTimeout));

        give(id).unwrap();
        assert_eq!(get_info(id).unwrap().value, 1);
        assert_eq!(take(id), Ok(()));
        delete(id).unwrap();
    }

    #[test]
    fn test_give_wakes_waiter() {
        let id = create("cs_wake", 0, 0).unwrap();
        let waiter = std::thread::spawn(move || take(id));
        std::thread::sleep(Duration::from_millis(50));
        give(id).unwrap();
        assert_eq!(waiter.join().unwrap(), Ok(()));
        delete(id).unwrap();
    }

    #[test]
    fn test_timed_wait_expiry() {
        let id = create("cs_timeout", 0, 0).unwrap();
        assert_eq!(timed_wait(id, 20), Err(OsError::SemTimeout));
        delete(id).unwrap();
    }
}
