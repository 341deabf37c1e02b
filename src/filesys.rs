// osal-core: Filesystem mapping API
//
// A mount table translating virtual paths to host paths.  A filesystem
// is created against a device name, mounted at a virtual mount point,
// and consulted by `translate_path` when other layers resolve virtual
// paths into host paths.

use std::path::PathBuf;
use std::sync::OnceLock;

use parking_lot::Mutex;

use crate::config;
use crate::error::{OsError, OsResult};
use crate::id::{ObjectId, ObjectType};
use crate::idmap::{self, LockMode};

struct FileSysSlot {
    state: Mutex<FileSysState>,
}

#[derive(Default, Clone)]
struct FileSysState {
    system_path: PathBuf,
    mount_point: Option<String>,
}

static IMPL: OnceLock<Vec<FileSysSlot>> = OnceLock::new();

fn impl_table() -> &'static [FileSysSlot] {
    IMPL.get_or_init(|| {
        (0..config::MAX_FILE_SYSTEMS)
            .map(|_| FileSysSlot {
                state: Mutex::new(FileSysState::default()),
            })
            .collect()
    })
}

/// Properties reported by `get_info`.
#[derive(Debug, Clone)]
pub struct FileSysProp {
    pub device_name: String,
    pub system_path: String,
    pub mount_point: Option<String>,
}

/// Create a filesystem mapping for `device_name` backed by a host path.
pub fn make(device_name: &str, system_path: &str) -> OsResult<ObjectId> {
    if system_path.is_empty() {
        return Err(OsError::FsErrPathInvalid);
    }
    let token = idmap::allocate_new(ObjectType::FileSys, Some(device_name))?;
    {
        let mut st = impl_table()[token.index()].state.lock();
        *st = FileSysState {
            system_path: PathBuf::from(system_path),
            mount_point: None,
        };
    }
    idmap::finalize_new(Ok(()), token)
}

/// Mount a created filesystem at a virtual mount point.
pub fn mount(device_name: &str, mount_point: &str) -> OsResult<()> {
    if !mount_point.starts_with('/') {
        return Err(OsError::FsErrPathInvalid);
    }
    let token = idmap::get_by_name(LockMode::Global, ObjectType::FileSys, device_name)?;
    let result = {
        let mut st = impl_table()[token.index()].state.lock();
        if st.mount_point.is_some() {
            Err(OsError::Error)
        } else {
            st.mount_point = Some(mount_point.to_string());
            Ok(())
        }
    };
    drop(token);
    result
}

/// Unmount the filesystem mounted at `mount_point`.
pub fn unmount(mount_point: &str) -> OsResult<()> {
    if !mount_point.starts_with('/') {
        return Err(OsError::FsErrPathInvalid);
    }
    let token = find_mounted(mount_point)?;
    impl_table()[token.index()].state.lock().mount_point = None;
    drop(token);
    Ok(())
}

fn find_mounted(mount_point: &str) -> OsResult<crate::idmap::Token> {
    let mut found = ObjectId::UNDEFINED;
    idmap::iterate_active(ObjectType::FileSys, |id| {
        if !found.is_defined() {
            if let Ok(token) = idmap::get_by_id(LockMode::Global, ObjectType::FileSys, id) {
                let matches = impl_table()[token.index()]
                    .state
                    .lock()
                    .mount_point
                    .as_deref()
                    == Some(mount_point);
                drop(token);
                if matches {
                    found = id;
                }
            }
        }
    });
    if found.is_defined() {
        idmap::get_by_id(LockMode::Global, ObjectType::FileSys, found)
    } else {
        Err(OsError::FsErrDriveNotCreated)
    }
}

/// Remove an unmounted filesystem mapping.
pub fn remove(device_name: &str) -> OsResult<()> {
    let guard = idmap::get_by_name(LockMode::Global, ObjectType::FileSys, device_name)?;
    let mounted = impl_table()[guard.index()].state.lock().mount_point.is_some();
    let id = guard.id();
    drop(guard);
    if mounted {
        return Err(OsError::Error);
    }

    let token = idmap::get_by_id(LockMode::Exclusive, ObjectType::FileSys, id)?;
    *impl_table()[token.index()].state.lock() = FileSysState::default();
    idmap::finalize_delete(Ok(()), token)
}

/// Translate a virtual path to the backing host path.
///
/// Fails with `FsErrPathInvalid` for relative paths and with
/// `FsErrDriveNotCreated` when no mounted filesystem covers the path.
pub fn translate_path(virtual_path: &str) -> OsResult<PathBuf> {
    if !virtual_path.starts_with('/') {
        return Err(OsError::FsErrPathInvalid);
    }

    let mut result: Option<PathBuf> = None;
    idmap::iterate_active(ObjectType::FileSys, |id| {
        if result.is_none() {
            if let Ok(token) = idmap::get_by_id(LockMode::Global, ObjectType::FileSys, id) {
                let st = impl_table()[token.index()].state.lock().clone();
                drop(token);
                if let Some(mp) = st.mount_point {
                    if let Some(rest) = virtual_path.strip_prefix(&mp) {
                        // Component-aware: "/ram" must not claim "/ram0/x".
                        if rest.is_empty() || rest.starts_with('/') {
                            let rest = rest.trim_start_matches('/');
                            result = Some(st.system_path.join(rest));
                        }
                    }
                }
            }
        }
    });
    result.ok_or(OsError::FsErrDriveNotCreated)
}

/// Report the mapping behind a device name.
pub fn get_info(device_name: &str) -> OsResult<FileSysProp> {
    let token = idmap::get_by_name(LockMode::Global, ObjectType::FileSys, device_name)?;
    let st = impl_table()[token.index()].state.lock().clone();
    drop(token);
    Ok(FileSysProp {
        device_name: device_name.to_string(),
        system_path: st.system_path.to_string_lossy().into_owned(),
        mount_point: st.mount_point,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_make_mount_translate_unmount() {
        make("fs_ram0", "/tmp/osal-fs-ram0").unwrap();
        mount("fs_ram0", "/ram0").unwrap();

        let host = translate_path("/ram0/logs/boot.txt").unwrap();
        assert_eq!(host, PathBuf::from("/tmp/osal-fs-ram0/logs/boot.txt"));

        unmount("/ram0").unwrap();
        assert_eq!(
            translate_path("/ram0/logs/boot.txt").err(),
            Some(OsError::FsErrDriveNotCreated)
        );
        remove("fs_ram0").unwrap();
    }

    #[test]
    fn test_relative_path_rejected() {
        assert_eq!(
            translate_path("ram0/file").err(),
            Some(OsError::FsErrPathInvalid)
        );
        assert_eq!(mount("whatever", "ram0").err(), Some(OsError::FsErrPathInvalid));
    }

    #[test]
    fn test_remove_refused_while_mounted() {
        make("fs_busy", "/tmp/osal-fs-busy").unwrap();
        mount("fs_busy", "/busy").unwrap();
        assert_eq!(remove("fs_busy"), Err(OsError::Error));
        unmount("/busy").unwrap();
        remove("fs_busy").unwrap();
    }
}
