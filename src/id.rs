// osal-core: Opaque 32-bit object identifiers
// Upper 16 bits carry the object type, lower 16 bits an opaque serial

use crate::config;
use crate::error::{OsError, OsResult};

/// Bit mask covering the serial-number component of an id.
pub const OBJECT_INDEX_MASK: u32 = 0xFFFF;

/// Shift distance of the object-type component of an id.
pub const OBJECT_TYPE_SHIFT: u32 = 16;

/// Type tags beyond this value are reserved for user extension and never
/// appear in a valid id issued by this layer.
pub const OBJECT_TYPE_USER: u32 = 0x10;

/// Object type tag carried in the upper bits of every id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ObjectType {
    Task = 1,
    Queue = 2,
    CountSem = 3,
    BinSem = 4,
    Mutex = 5,
    Stream = 6,
    Dir = 7,
    TimeBase = 8,
    TimeCb = 9,
    Module = 10,
    FileSys = 11,
    Console = 12,
    RwLock = 13,
}

/// All type tags that have a resource table, in tag order.
pub const ALL_OBJECT_TYPES: [ObjectType; 13] = [
    ObjectType::Task,
    ObjectType::Queue,
    ObjectType::CountSem,
    ObjectType::BinSem,
    ObjectType::Mutex,
    ObjectType::Stream,
    ObjectType::Dir,
    ObjectType::TimeBase,
    ObjectType::TimeCb,
    ObjectType::Module,
    ObjectType::FileSys,
    ObjectType::Console,
    ObjectType::RwLock,
];

impl ObjectType {
    /// Reconstruct a type from its raw tag value.
    pub fn from_tag(tag: u32) -> Option<ObjectType> {
        ALL_OBJECT_TYPES.get(tag.wrapping_sub(1) as usize).copied()
    }

    /// Table capacity for this type.
    pub fn capacity(self) -> usize {
        match self {
            ObjectType::Task => config::MAX_TASKS,
            ObjectType::Queue => config::MAX_QUEUES,
            ObjectType::CountSem => config::MAX_COUNT_SEMAPHORES,
            ObjectType::BinSem => config::MAX_BIN_SEMAPHORES,
            ObjectType::Mutex => config::MAX_MUTEXES,
            ObjectType::Stream => config::MAX_OPEN_FILES,
            ObjectType::Dir => config::MAX_OPEN_DIRS,
            ObjectType::TimeBase => config::MAX_TIMEBASES,
            ObjectType::TimeCb => config::MAX_TIMERS,
            ObjectType::Module => config::MAX_MODULES,
            ObjectType::FileSys => config::MAX_FILE_SYSTEMS,
            ObjectType::Console => config::MAX_CONSOLES,
            ObjectType::RwLock => config::MAX_RWLOCKS,
        }
    }

    /// First serial number issued for this type.  Serial ranges of
    /// different types are disjoint, so an index can be recovered from a
    /// bare serial even when the type is not known up front.
    pub fn serial_base(self) -> u32 {
        let mut base = 1;
        for t in ALL_OBJECT_TYPES {
            if t == self {
                break;
            }
            base += t.capacity() as u32;
        }
        base
    }
}

/// Opaque handle to an OSAL resource.
///
/// Ids are stable for the lifetime of the resource, comparable for
/// equality, and convertible to and from a raw `u32` for logging or
/// storage.  They are not capabilities; any valid-looking value can be
/// presented to the API, which validates it against the live tables.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ObjectId(u32);

impl ObjectId {
    /// Sentinel for "no object"; never issued for a live resource.
    pub const UNDEFINED: ObjectId = ObjectId(0);

    /// Sentinel occupying a slot while it is being created or deleted;
    /// never visible as a caller-facing id.
    pub const RESERVED: ObjectId = ObjectId(u32::MAX);

    /// Reconstitute an id from its integer representation.
    pub const fn from_raw(value: u32) -> ObjectId {
        ObjectId(value)
    }

    /// Integer representation of the id, suitable for printing with a
    /// hex conversion so the internal fields stay legible.
    pub const fn as_raw(self) -> u32 {
        self.0
    }

    /// Compose an id from a type tag and serial number.
    pub(crate) fn compose(objtype: ObjectType, serial: u32) -> ObjectId {
        ObjectId(((objtype as u32) << OBJECT_TYPE_SHIFT) | (serial & OBJECT_INDEX_MASK))
    }

    /// Raw type tag in the upper bits.
    pub fn type_tag(self) -> u32 {
        self.0 >> OBJECT_TYPE_SHIFT
    }

    /// Serial component in the lower bits.
    pub fn serial(self) -> u32 {
        self.0 & OBJECT_INDEX_MASK
    }

    /// Decoded object type, if the tag names one of the known tables.
    pub fn object_type(self) -> Option<ObjectType> {
        ObjectType::from_tag(self.type_tag())
    }

    /// True for anything other than the `UNDEFINED` sentinel.  Matches
    /// ids that are mid-creation or mid-deletion, unlike `is_valid`.
    pub fn is_defined(self) -> bool {
        self.0 != 0
    }

    /// True only for ids in the range issued to live resources.  The
    /// `RESERVED` sentinel is defined but not valid.
    pub fn is_valid(self) -> bool {
        let tag = self.type_tag();
        tag > 0 && tag < OBJECT_TYPE_USER
    }
}

impl std::fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ObjectId({:#010x})", self.0)
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Report the object type tag an id claims to carry.
///
/// This is a structural decode only; it does not check that the id refers
/// to a live resource.  Returns 0 for undefined or out-of-range ids.
pub fn identify_object(id: ObjectId) -> u32 {
    if id.is_valid() {
        id.type_tag()
    } else {
        0
    }
}

/// Convert an id of a known type into a zero-based table index.
pub fn object_id_to_array_index(objtype: ObjectType, id: ObjectId) -> OsResult<usize> {
    if id.object_type() != Some(objtype) {
        return Err(OsError::InvalidId);
    }
    let idx = id.serial().wrapping_sub(objtype.serial_base()) as usize;
    if idx >= objtype.capacity() {
        return Err(OsError::InvalidId);
    }
    Ok(idx)
}

/// Convert an id into a zero-based index without knowing its type.
///
/// Serial ranges are disjoint across types, so the serial alone is enough
/// to locate the owning table and slot.  Ids whose tag names no table
/// fail with `IncorrectObjType`.
pub fn convert_to_array_index(id: ObjectId) -> OsResult<usize> {
    let objtype = id.object_type().ok_or(OsError::IncorrectObjType)?;
    object_id_to_array_index(objtype, id)
}
