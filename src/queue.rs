// osal-core: Message queue engine
//
// Bounded FIFO of variable-length messages up to a per-queue maximum
// size.  Storage is a ring guarded by the queue mutex; two conditions
// signal not-empty and not-full.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

use bitflags::bitflags;
use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::config;
use crate::error::{OsError, OsResult};
use crate::id::{ObjectId, ObjectType};
use crate::idmap::{self, LockMode};
use crate::Timeout;

bitflags! {
    /// Queue creation and transfer options.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct QueueFlags: u32 {
        /// `put` pends for ring space instead of failing with `QueueFull`.
        const BLOCK_ON_FULL = 0x01;
    }
}

struct QueueSlot {
    lock: Mutex<QueueRing>,
    not_empty: Condvar,
    not_full: Condvar,
}

#[derive(Default)]
struct QueueRing {
    max_depth: usize,
    max_size: usize,
    head: usize,
    count: usize,
    slots: Vec<Option<Vec<u8>>>,
    /// Set by delete before the identity is retired so pending getters
    /// and putters unblock with `InvalidId`.
    closing: bool,
}

impl QueueRing {
    fn push(&mut self, msg: Vec<u8>) {
        let tail = (self.head + self.count) % self.max_depth;
        self.slots[tail] = Some(msg);
        self.count += 1;
    }

    fn pop(&mut self) -> Vec<u8> {
        let msg = self.slots[self.head].take().unwrap_or_default();
        self.head = (self.head + 1) % self.max_depth;
        self.count -= 1;
        msg
    }
}

static IMPL: OnceLock<Vec<QueueSlot>> = OnceLock::new();

fn impl_table() -> &'static [QueueSlot] {
    IMPL.get_or_init(|| {
        (0..config::MAX_QUEUES)
            .map(|_| QueueSlot {
                lock: Mutex::new(QueueRing::default()),
                not_empty: Condvar::new(),
                not_full: Condvar::new(),
            })
            .collect()
    })
}

/// Properties reported by `get_info`.
#[derive(Debug, Clone)]
pub struct QueueProp {
    pub name: String,
    pub creator: ObjectId,
    pub max_depth: usize,
    pub max_size: usize,
    pub count: usize,
}

/// Create a message queue holding up to `max_depth` messages of up to
/// `max_size` bytes each.
///
/// Depths beyond the host limit fail with `QueueInvalidSize` unless the
/// build enables permissive mode, in which case the depth is silently
/// truncated to the limit.
pub fn create(
    name: &str,
    max_depth: usize,
    max_size: usize,
    _flags: QueueFlags,
) -> OsResult<ObjectId> {
    if max_depth == 0 || max_size == 0 {
        return Err(OsError::InvalidSize);
    }

    let depth = if max_depth > config::QUEUE_MAX_DEPTH {
        if !config::QUEUE_PERMISSIVE_MODE {
            return Err(OsError::QueueInvalidSize);
        }
        debug!(
            requested = max_depth,
            limit = config::QUEUE_MAX_DEPTH,
            "queue depth truncated to host limit"
        );
        config::QUEUE_MAX_DEPTH
    } else {
        max_depth
    };

    let token = idmap::allocate_new(ObjectType::Queue, Some(name))?;
    {
        let mut ring = impl_table()[token.index()].lock.lock();
        *ring = QueueRing {
            max_depth: depth,
            max_size,
            head: 0,
            count: 0,
            slots: (0..depth).map(|_| None).collect(),
            closing: false,
        };
    }
    idmap::finalize_new(Ok(()), token)
}

/// Delete a queue, draining any stored messages.
///
/// Tasks blocked in `get` or `put` on this queue unblock with
/// `InvalidId`.
pub fn delete(queue_id: ObjectId) -> OsResult<()> {
    // Mark the ring closing first so blocked getters and putters drain
    // their refcounts; only then can the slot go exclusive.
    let guard = idmap::get_by_id(LockMode::Global, ObjectType::Queue, queue_id)?;
    {
        let slot = &impl_table()[guard.index()];
        let mut ring = slot.lock.lock();
        ring.closing = true;
        slot.not_empty.notify_all();
        slot.not_full.notify_all();
    }
    drop(guard);

    let token = idmap::get_by_id(LockMode::Exclusive, ObjectType::Queue, queue_id)?;
    {
        let mut ring = impl_table()[token.index()].lock.lock();
        *ring = QueueRing::default();
    }
    idmap::finalize_delete(Ok(()), token)
}

/// Append a message to the queue.
///
/// Zero-length messages are rejected with `InvalidSize`; messages larger
/// than the queue's `max_size` with `QueueInvalidSize`.  A full queue
/// fails with `QueueFull` unless `BLOCK_ON_FULL` is set, in which case
/// the caller pends for space.
pub fn put(queue_id: ObjectId, data: &[u8], flags: QueueFlags) -> OsResult<()> {
    if data.is_empty() {
        return Err(OsError::InvalidSize);
    }

    let token = idmap::get_by_id(LockMode::Refcount, ObjectType::Queue, queue_id)?;
    let slot = &impl_table()[token.index()];

    let result = {
        let mut ring = slot.lock.lock();
        loop {
            if ring.closing {
                break Err(OsError::InvalidId);
            }
            if data.len() > ring.max_size {
                break Err(OsError::QueueInvalidSize);
            }
            if ring.count < ring.max_depth {
                ring.push(data.to_vec());
                slot.not_empty.notify_one();
                break Ok(());
            }
            if !flags.contains(QueueFlags::BLOCK_ON_FULL) {
                break Err(OsError::QueueFull);
            }
            slot.not_full.wait(&mut ring);
        }
    };

    idmap::release(token);
    result
}

/// Remove the oldest message from the queue into `buffer`, returning the
/// number of bytes copied.
///
/// With `Timeout::Check` an empty queue fails immediately with
/// `QueueEmpty`; with `Timeout::Pend` the caller blocks until a message
/// arrives or the queue is deleted; a finite timeout fails with
/// `QueueTimeout` on expiry.  A stored message larger than `buffer` is
/// still consumed: the first `buffer.len()` bytes are copied and the
/// call reports `QueueInvalidSize`.
pub fn get(queue_id: ObjectId, buffer: &mut [u8], timeout: Timeout) -> OsResult<usize> {
    if buffer.is_empty() {
        return Err(OsError::InvalidSize);
    }

    let token = idmap::get_by_id(LockMode::Refcount, ObjectType::Queue, queue_id)?;
    let slot = &impl_table()[token.index()];
    let deadline = match timeout {
        Timeout::Millis(ms) => Some(Instant::now() + Duration::from_millis(u64::from(ms))),
        _ => None,
    };

    let result = {
        let mut ring = slot.lock.lock();
        let mut result = Ok(());
        while ring.count == 0 && !ring.closing {
            match timeout {
                Timeout::Check => {
                    result = Err(OsError::QueueEmpty);
                    break;
                }
                Timeout::Pend => slot.not_empty.wait(&mut ring),
                Timeout::Millis(_) => {
                    let deadline = deadline.unwrap_or_else(Instant::now);
                    if slot.not_empty.wait_until(&mut ring, deadline).timed_out() {
                        result = Err(OsError::QueueTimeout);
                        break;
                    }
                }
            }
        }

        result.and_then(|_| {
            if ring.closing {
                return Err(OsError::InvalidId);
            }
            let msg = ring.pop();
            slot.not_full.notify_one();
            if msg.len() > buffer.len() {
                let n = buffer.len();
                buffer.copy_from_slice(&msg[..n]);
                Err(OsError::QueueInvalidSize)
            } else {
                buffer[..msg.len()].copy_from_slice(&msg);
                Ok(msg.len())
            }
        })
    };

    idmap::release(token);
    result
}

/// Find a queue by name.
pub fn get_id_by_name(name: &str) -> OsResult<ObjectId> {
    idmap::find_by_name(ObjectType::Queue, name)
}

/// Report the name, creator, and occupancy of a queue.
pub fn get_info(queue_id: ObjectId) -> OsResult<QueueProp> {
    let token = idmap::get_by_id(LockMode::Global, ObjectType::Queue, queue_id)?;
    let (name, creator) = idmap::with_record(&token, |rec| {
        (
            rec.name.map(|n| n.to_string()).unwrap_or_default(),
            rec.creator_id,
        )
    });
    let ring = impl_table()[token.index()].lock.lock();
    let prop = QueueProp {
        name,
        creator,
        max_depth: ring.max_depth,
        max_size: ring.max_size,
        count: ring.count,
    };
    drop(ring);
    drop(token);
    Ok(prop)
}
