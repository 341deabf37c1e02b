// osal-core: Reader-writer lock API
//
// Explicit read/write take and give.  When the host does not offer a
// reader-writer lock every operation reports `NotImplemented`; a mutex is
// never silently substituted.

use std::sync::OnceLock;

use parking_lot::{Condvar, Mutex};

use crate::config;
use crate::error::{OsError, OsResult};
use crate::host;
use crate::id::{ObjectId, ObjectType};
use crate::idmap::{self, LockMode};

struct RwLockSlot {
    lock: Mutex<RwLockState>,
    cond: Condvar,
}

#[derive(Default)]
struct RwLockState {
    readers: u32,
    writer: bool,
}

static IMPL: OnceLock<Vec<RwLockSlot>> = OnceLock::new();

fn impl_table() -> &'static [RwLockSlot] {
    IMPL.get_or_init(|| {
        (0..config::MAX_RWLOCKS)
            .map(|_| RwLockSlot {
                lock: Mutex::new(RwLockState::default()),
                cond: Condvar::new(),
            })
            .collect()
    })
}

/// Properties reported by `get_info`.
#[derive(Debug, Clone)]
pub struct RwLockProp {
    pub name: String,
    pub creator: ObjectId,
}

fn supported() -> OsResult<()> {
    supported_with(host::capabilities().native_rwlock)
}

fn supported_with(native_rwlock: bool) -> OsResult<()> {
    if native_rwlock {
        Ok(())
    } else {
        Err(OsError::NotImplemented)
    }
}

/// Create a reader-writer lock.
pub fn create(name: &str, _options: u32) -> OsResult<ObjectId> {
    supported()?;
    let token = idmap::allocate_new(ObjectType::RwLock, Some(name))?;
    {
        let mut state = impl_table()[token.index()].lock.lock();
        *state = RwLockState::default();
    }
    idmap::finalize_new(Ok(()), token)
}

/// Delete a reader-writer lock.  Fails with `SemFailure` while held.
pub fn delete(lock_id: ObjectId) -> OsResult<()> {
    supported()?;
    let guard = idmap::get_by_id(LockMode::Global, ObjectType::RwLock, lock_id)?;
    let held = {
        let state = impl_table()[guard.index()].lock.lock();
        state.writer || state.readers > 0
    };
    drop(guard);
    if held {
        return Err(OsError::SemFailure);
    }

    let token = idmap::get_by_id(LockMode::Exclusive, ObjectType::RwLock, lock_id)?;
    idmap::finalize_delete(Ok(()), token)
}

/// Acquire the lock for shared reading.  Multiple readers may hold the
/// lock concurrently; readers pend while a writer holds it.
pub fn read_take(lock_id: ObjectId) -> OsResult<()> {
    supported()?;
    let token = idmap::get_by_id(LockMode::Refcount, ObjectType::RwLock, lock_id)?;
    let slot = &impl_table()[token.index()];
    {
        let mut state = slot.lock.lock();
        while state.writer {
            slot.cond.wait(&mut state);
        }
        state.readers += 1;
    }
    idmap::release(token);
    Ok(())
}

/// Release a shared-read hold.
pub fn read_give(lock_id: ObjectId) -> OsResult<()> {
    supported()?;
    let token = idmap::get_by_id(LockMode::Refcount, ObjectType::RwLock, lock_id)?;
    let slot = &impl_table()[token.index()];
    let result = {
        let mut state = slot.lock.lock();
        if state.readers == 0 {
            Err(OsError::SemFailure)
        } else {
            state.readers -= 1;
            if state.readers == 0 {
                slot.cond.notify_all();
            }
            Ok(())
        }
    };
    idmap::release(token);
    result
}

/// Acquire the lock exclusively for writing.
pub fn write_take(lock_id: ObjectId) -> OsResult<()> {
    supported()?;
    let token = idmap::get_by_id(LockMode::Refcount, ObjectType::RwLock, lock_id)?;
    let slot = &impl_table()[token.index()];
    {
        let mut state = slot.lock.lock();
        while state.writer || state.readers > 0 {
            slot.cond.wait(&mut state);
        }
        state.writer = true;
    }
    idmap::release(token);
    Ok(())
}

/// Release an exclusive-write hold.
pub fn write_give(lock_id: ObjectId) -> OsResult<()> {
    supported()?;
    let token = idmap::get_by_id(LockMode::Refcount, ObjectType::RwLock, lock_id)?;
    let slot = &impl_table()[token.index()];
    let result = {
        let mut state = slot.lock.lock();
        if !state.writer {
            Err(OsError::SemFailure)
        } else {
            state.writer = false;
            slot.cond.notify_all();
            Ok(())
        }
    };
    idmap::release(token);
    result
}

/// Report the name and creator of a reader-writer lock.
pub fn get_info(lock_id: ObjectId) -> OsResult<RwLockProp> {
    supported()?;
    let token = idmap::get_by_id(LockMode::Global, ObjectType::RwLock, lock_id)?;
    let (name, creator) = idmap::with_record(&token, |rec| {
        (
            rec.name.map(|n| n.to_string()).unwrap_or_default(),
            rec.creator_id,
        )
    });
    drop(token);
    Ok(RwLockProp { name, creator })
}
