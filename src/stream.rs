// osal-core: File stream API
//
// Thin host binding over the filesystem, carried through the identity
// layer so descriptors share the common lifecycle with every other
// resource.  Streams are nameless in the common table; the full host
// path lives in the per-stream record.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::OnceLock;

use bitflags::bitflags;
use parking_lot::Mutex;

use crate::config;
use crate::error::{OsError, OsResult};
use crate::id::{ObjectId, ObjectType};
use crate::idmap::{self, LockMode};

bitflags! {
    /// Open disposition flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct OpenFlags: u32 {
        /// Create the file if it does not exist.
        const CREATE = 0x01;
        /// Truncate an existing file on open.
        const TRUNCATE = 0x02;
    }
}

/// Requested access mode for an open stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

/// Seek origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Set,
    Current,
    End,
}

struct StreamSlot {
    state: Mutex<Option<StreamState>>,
}

struct StreamState {
    path: String,
    file: File,
}

static IMPL: OnceLock<Vec<StreamSlot>> = OnceLock::new();

fn impl_table() -> &'static [StreamSlot] {
    IMPL.get_or_init(|| {
        (0..config::MAX_OPEN_FILES)
            .map(|_| StreamSlot {
                state: Mutex::new(None),
            })
            .collect()
    })
}

/// Properties reported by `get_info`.
#[derive(Debug, Clone)]
pub struct StreamProp {
    pub path: String,
    pub creator: ObjectId,
}

/// Open a file stream, optionally creating or truncating it.
pub fn open_create(path: &str, flags: OpenFlags, access: AccessMode) -> OsResult<ObjectId> {
    if path.is_empty() {
        return Err(OsError::FsErrPathInvalid);
    }

    let mut options = OpenOptions::new();
    match access {
        AccessMode::ReadOnly => options.read(true),
        AccessMode::WriteOnly => options.write(true),
        AccessMode::ReadWrite => options.read(true).write(true),
    };
    if flags.contains(OpenFlags::CREATE) {
        options.create(true);
    }
    if flags.contains(OpenFlags::TRUNCATE) {
        options.truncate(true);
    }

    let token = idmap::allocate_new(ObjectType::Stream, None)?;
    let status = match options.open(path) {
        Ok(file) => {
            *impl_table()[token.index()].state.lock() = Some(StreamState {
                path: path.to_string(),
                file,
            });
            Ok(())
        }
        Err(_) => Err(OsError::Error),
    };
    idmap::finalize_new(status, token)
}

/// Close a stream and release its descriptor.
pub fn close(stream_id: ObjectId) -> OsResult<()> {
    let token = idmap::get_by_id(LockMode::Exclusive, ObjectType::Stream, stream_id)?;
    *impl_table()[token.index()].state.lock() = None;
    idmap::finalize_delete(Ok(()), token)
}

/// Read up to `buffer.len()` bytes, returning the count actually read.
pub fn read(stream_id: ObjectId, buffer: &mut [u8]) -> OsResult<usize> {
    let token = idmap::get_by_id(LockMode::Refcount, ObjectType::Stream, stream_id)?;
    let result = {
        let mut state = impl_table()[token.index()].state.lock();
        match state.as_mut() {
            Some(st) => st.file.read(buffer).map_err(|_| OsError::Error),
            None => Err(OsError::InvalidId),
        }
    };
    idmap::release(token);
    result
}

/// Write the buffer, returning the count actually written.
pub fn write(stream_id: ObjectId, buffer: &[u8]) -> OsResult<usize> {
    let token = idmap::get_by_id(LockMode::Refcount, ObjectType::Stream, stream_id)?;
    let result = {
        let mut state = impl_table()[token.index()].state.lock();
        match state.as_mut() {
            Some(st) => st.file.write(buffer).map_err(|_| OsError::Error),
            None => Err(OsError::InvalidId),
        }
    };
    idmap::release(token);
    result
}

/// Reposition the stream, returning the new offset from the start.
pub fn lseek(stream_id: ObjectId, offset: i64, whence: Whence) -> OsResult<u64> {
    let token = idmap::get_by_id(LockMode::Refcount, ObjectType::Stream, stream_id)?;
    let pos = match whence {
        Whence::Set => SeekFrom::Start(offset.max(0) as u64),
        Whence::Current => SeekFrom::Current(offset),
        Whence::End => SeekFrom::End(offset),
    };
    let result = {
        let mut state = impl_table()[token.index()].state.lock();
        match state.as_mut() {
            Some(st) => st.file.seek(pos).map_err(|_| OsError::Error),
            None => Err(OsError::InvalidId),
        }
    };
    idmap::release(token);
    result
}

/// Report the host path behind a stream.
pub fn get_info(stream_id: ObjectId) -> OsResult<StreamProp> {
    let token = idmap::get_by_id(LockMode::Global, ObjectType::Stream, stream_id)?;
    let creator = idmap::with_record(&token, |rec| rec.creator_id);
    let path = {
        let state = impl_table()[token.index()].state.lock();
        state.as_ref().map(|st| st.path.clone())
    };
    drop(token);
    match path {
        Some(path) => Ok(StreamProp { path, creator }),
        None => Err(OsError::InvalidId),
    }
}

/// Check whether any stream currently has `path` open, returning its id.
pub fn file_open_check(path: &str) -> OsResult<ObjectId> {
    let mut found = ObjectId::UNDEFINED;
    idmap::iterate_active(ObjectType::Stream, |id| {
        if !found.is_defined() {
            if let Ok(prop) = get_info(id) {
                if prop.path == path {
                    found = id;
                }
            }
        }
    });
    if found.is_defined() {
        Ok(found)
    } else {
        Err(OsError::Error)
    }
}
