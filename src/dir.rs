// osal-core: Directory API
//
// Directory iteration carried through the identity layer.  Rewind
// re-opens the host iterator; entry order is host-defined.

use std::fs::ReadDir;
use std::path::PathBuf;
use std::sync::OnceLock;

use parking_lot::Mutex;

use crate::config;
use crate::error::{OsError, OsResult};
use crate::id::{ObjectId, ObjectType};
use crate::idmap::{self, LockMode};

struct DirSlot {
    state: Mutex<Option<DirState>>,
}

struct DirState {
    path: PathBuf,
    iter: ReadDir,
}

static IMPL: OnceLock<Vec<DirSlot>> = OnceLock::new();

fn impl_table() -> &'static [DirSlot] {
    IMPL.get_or_init(|| {
        (0..config::MAX_OPEN_DIRS)
            .map(|_| DirSlot {
                state: Mutex::new(None),
            })
            .collect()
    })
}

/// Open a directory for iteration.
pub fn open(path: &str) -> OsResult<ObjectId> {
    if path.is_empty() {
        return Err(OsError::FsErrPathInvalid);
    }

    let token = idmap::allocate_new(ObjectType::Dir, None)?;
    let status = match std::fs::read_dir(path) {
        Ok(iter) => {
            *impl_table()[token.index()].state.lock() = Some(DirState {
                path: PathBuf::from(path),
                iter,
            });
            Ok(())
        }
        Err(_) => Err(OsError::Error),
    };
    idmap::finalize_new(status, token)
}

/// Read the next entry name, or `None` at the end of the directory.
pub fn read(dir_id: ObjectId) -> OsResult<Option<String>> {
    let token = idmap::get_by_id(LockMode::Refcount, ObjectType::Dir, dir_id)?;
    let result = {
        let mut state = impl_table()[token.index()].state.lock();
        match state.as_mut() {
            Some(st) => match st.iter.next() {
                Some(Ok(entry)) => Ok(Some(entry.file_name().to_string_lossy().into_owned())),
                Some(Err(_)) => Err(OsError::Error),
                None => Ok(None),
            },
            None => Err(OsError::InvalidId),
        }
    };
    idmap::release(token);
    result
}

/// Restart iteration from the first entry.
pub fn rewind(dir_id: ObjectId) -> OsResult<()> {
    let token = idmap::get_by_id(LockMode::Refcount, ObjectType::Dir, dir_id)?;
    let result = {
        let mut state = impl_table()[token.index()].state.lock();
        match state.as_mut() {
            Some(st) => match std::fs::read_dir(&st.path) {
                Ok(iter) => {
                    st.iter = iter;
                    Ok(())
                }
                Err(_) => Err(OsError::Error),
            },
            None => Err(OsError::InvalidId),
        }
    };
    idmap::release(token);
    result
}

/// Close the directory and release its descriptor.
pub fn close(dir_id: ObjectId) -> OsResult<()> {
    let token = idmap::get_by_id(LockMode::Exclusive, ObjectType::Dir, dir_id)?;
    *impl_table()[token.index()].state.lock() = None;
    idmap::finalize_delete(Ok(()), token)
}
