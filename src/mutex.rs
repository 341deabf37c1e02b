// osal-core: Mutex semaphore API
//
// Explicit give/take with recursion.  The host mutex cannot be released
// from a different call frame than the one that acquired it, so ownership
// and depth are carried alongside a plain mutex/condvar pair.

use std::sync::OnceLock;
use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex};

use crate::config;
use crate::error::{OsError, OsResult};
use crate::id::{ObjectId, ObjectType};
use crate::idmap::{self, LockMode};

struct MutexSlot {
    lock: Mutex<MutexState>,
    cond: Condvar,
}

#[derive(Default)]
struct MutexState {
    owner: Option<ThreadId>,
    depth: u32,
}

static IMPL: OnceLock<Vec<MutexSlot>> = OnceLock::new();

fn impl_table() -> &'static [MutexSlot] {
    IMPL.get_or_init(|| {
        (0..config::MAX_MUTEXES)
            .map(|_| MutexSlot {
                lock: Mutex::new(MutexState::default()),
                cond: Condvar::new(),
            })
            .collect()
    })
}

/// Properties reported by `get_info`.
#[derive(Debug, Clone)]
pub struct MutexProp {
    pub name: String,
    pub creator: ObjectId,
}

/// Create a mutex semaphore.  Not callable from interrupt context.
pub fn create(name: &str, _options: u32) -> OsResult<ObjectId> {
    let token = idmap::allocate_new(ObjectType::Mutex, Some(name))?;
    {
        let mut state = impl_table()[token.index()].lock.lock();
        *state = MutexState::default();
    }
    idmap::finalize_new(Ok(()), token)
}

/// Delete a mutex.  Fails with `SemFailure` while it is held.
pub fn delete(mutex_id: ObjectId) -> OsResult<()> {
    let guard = idmap::get_by_id(LockMode::Global, ObjectType::Mutex, mutex_id)?;
    let held = impl_table()[guard.index()].lock.lock().owner.is_some();
    drop(guard);
    if held {
        return Err(OsError::SemFailure);
    }

    let token = idmap::get_by_id(LockMode::Exclusive, ObjectType::Mutex, mutex_id)?;
    idmap::finalize_delete(Ok(()), token)
}

/// Acquire the mutex, pending until it is available.  The holder may
/// take the same mutex again; each take needs a matching give.
pub fn take(mutex_id: ObjectId) -> OsResult<()> {
    let token = idmap::get_by_id(LockMode::Refcount, ObjectType::Mutex, mutex_id)?;
    let slot = &impl_table()[token.index()];
    let me = thread::current().id();
    {
        let mut state = slot.lock.lock();
        if state.owner == Some(me) {
            state.depth += 1;
        } else {
            while state.owner.is_some() {
                slot.cond.wait(&mut state);
            }
            state.owner = Some(me);
            state.depth = 1;
        }
    }
    idmap::release(token);
    Ok(())
}

/// Release the mutex.  Only the owning task may give; a give from any
/// other task fails with `SemFailure` and leaves the mutex held.
pub fn give(mutex_id: ObjectId) -> OsResult<()> {
    let token = idmap::get_by_id(LockMode::Refcount, ObjectType::Mutex, mutex_id)?;
    let slot = &impl_table()[token.index()];
    let me = thread::current().id();
    let result = {
        let mut state = slot.lock.lock();
        if state.owner != Some(me) {
            Err(OsError::SemFailure)
        } else {
            state.depth -= 1;
            if state.depth == 0 {
                state.owner = None;
                slot.cond.notify_one();
            }
            Ok(())
        }
    };
    idmap::release(token);
    result
}

/// Find a mutex by name.
pub fn get_id_by_name(name: &str) -> OsResult<ObjectId> {
    idmap::find_by_name(ObjectType::Mutex, name)
}

/// Report the name and creator of a mutex.
pub fn get_info(mutex_id: ObjectId) -> OsResult<MutexProp> {
    let token = idmap::get_by_id(LockMode::Global, ObjectType::Mutex, mutex_id)?;
    let (name, creator) = idmap::with_record(&token, |rec| {
        (
            rec.name.map(|n| n.to_string()).unwrap_or_default(),
            rec.creator_id,
        )
    });
    drop(token);
    Ok(MutexProp { name, creator })
}
