// osal-core: Timebase engine
//
// A timebase is a monotonic tick source with a dedicated helper thread.
// The helper either sleeps out a configured interval (internal mode) or
// calls a caller-supplied synchronization function that pends on an
// external event and reports the elapsed microseconds (external mode).
// On every tick the helper advances the free-running counter and
// dispatches the timer callbacks registered against this timebase.

use std::sync::{Arc, OnceLock};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use smallvec::SmallVec;
use tracing::debug;

use crate::config;
use crate::error::{OsError, OsResult};
use crate::id::{ObjectId, ObjectType};
use crate::idmap::{self, LockMode};

/// External synchronization function: pends until the next external tick
/// and returns the number of microseconds elapsed since the prior call.
pub type TimeBaseSync = Arc<dyn Fn() -> u32 + Send + Sync>;

/// Timer callback, invoked on the timebase helper thread with the
/// expiring timer's id.
pub(crate) type TimerCallback = Arc<dyn Fn(ObjectId) + Send + Sync>;

/// Tick resolution of an internally-driven timebase, in microseconds.
const INTERNAL_ACCURACY_US: u32 = 1000;

/// Bound on startup-handshake waits before creation is abandoned.
const STARTUP_RETRY_LIMIT: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RegState {
    NotStarted,
    Registered,
    Error,
}

pub(crate) struct TimerEntry {
    pub id: ObjectId,
    pub callback: TimerCallback,
    /// Absolute expiry in timebase time (free-run microseconds).
    pub next_expiry: u64,
    pub interval_us: u32,
    pub armed: bool,
    /// Removal requested from inside this timer's own callback; the
    /// helper completes it once the callback returns.
    pub pending_delete: bool,
}

struct TimeBaseState {
    start_us: u32,
    interval_us: u32,
    accuracy_us: u32,
    config_gen: u32,
    external: Option<TimeBaseSync>,
    reg_state: RegState,
    shutdown: bool,
    freerun_us: u64,
    timers: SmallVec<[TimerEntry; 4]>,
    dispatching: Option<ObjectId>,
    helper: Option<thread::JoinHandle<()>>,
    helper_thread: Option<ThreadId>,
}

impl Default for TimeBaseState {
    fn default() -> Self {
        TimeBaseState {
            start_us: 0,
            interval_us: 0,
            accuracy_us: INTERNAL_ACCURACY_US,
            config_gen: 0,
            external: None,
            reg_state: RegState::NotStarted,
            shutdown: false,
            freerun_us: 0,
            timers: SmallVec::new(),
            dispatching: None,
            helper: None,
            helper_thread: None,
        }
    }
}

struct TimeBaseSlot {
    lock: Mutex<TimeBaseState>,
    cond: Condvar,
}

static IMPL: OnceLock<Vec<TimeBaseSlot>> = OnceLock::new();

fn impl_table() -> &'static [TimeBaseSlot] {
    IMPL.get_or_init(|| {
        (0..config::MAX_TIMEBASES)
            .map(|_| TimeBaseSlot {
                lock: Mutex::new(TimeBaseState::default()),
                cond: Condvar::new(),
            })
            .collect()
    })
}

/// Properties reported by `get_info`.
#[derive(Debug, Clone)]
pub struct TimeBaseProp {
    pub name: String,
    pub creator: ObjectId,
    pub nominal_interval_time: u32,
    pub freerun_time: u32,
    pub accuracy: u32,
}

/// Dispatch every timer whose deadline has passed, invoking callbacks
/// with the timebase lock released.  Single pass: a timer fires at most
/// once per tick even when it is behind.
fn dispatch_expired<'a>(
    slot: &'a TimeBaseSlot,
    mut st: MutexGuard<'a, TimeBaseState>,
    now: u64,
) -> MutexGuard<'a, TimeBaseState> {
    let expired: SmallVec<[(ObjectId, TimerCallback); 4]> = st
        .timers
        .iter()
        .filter(|e| e.armed && !e.pending_delete && e.next_expiry <= now)
        .map(|e| (e.id, Arc::clone(&e.callback)))
        .collect();

    for (timer_id, callback) in expired {
        st.dispatching = Some(timer_id);
        drop(st);
        callback(timer_id);
        st = slot.lock.lock();
        st.dispatching = None;
        slot.cond.notify_all();

        if let Some(pos) = st.timers.iter().position(|e| e.id == timer_id) {
            if st.timers[pos].pending_delete {
                st.timers.remove(pos);
            } else {
                let entry = &mut st.timers[pos];
                if entry.interval_us > 0 {
                    entry.next_expiry += u64::from(entry.interval_us);
                } else {
                    // One-shot consumed.
                    entry.armed = false;
                }
            }
        }
    }
    st
}

/// Helper thread body.  Registers itself, signals the creator, then
/// services ticks until shutdown.
fn helper_body(idx: usize) {
    let slot = &impl_table()[idx];

    let mut st = slot.lock.lock();
    st.reg_state = RegState::Registered;
    st.helper_thread = Some(thread::current().id());
    slot.cond.notify_all();

    let mut deadline: Option<Instant> = None;
    let mut pending_delta: u64 = 0;
    let mut gen_seen = st.config_gen;

    loop {
        if st.shutdown {
            break;
        }

        if let Some(sync) = st.external.clone() {
            // External mode: the sync function pends on the outside
            // world; never hold the lock across it.
            drop(st);
            let elapsed = sync();
            st = slot.lock.lock();
            if st.shutdown {
                break;
            }
            st.freerun_us = st.freerun_us.wrapping_add(u64::from(elapsed));
            let now = st.freerun_us;
            st = dispatch_expired(slot, st, now);
            continue;
        }

        if st.config_gen != gen_seen {
            gen_seen = st.config_gen;
            if st.interval_us == 0 && st.start_us == 0 {
                deadline = None;
            } else {
                let first = if st.start_us > 0 {
                    st.start_us
                } else {
                    st.interval_us
                };
                pending_delta = u64::from(first);
                deadline = Some(Instant::now() + Duration::from_micros(u64::from(first)));
            }
        }

        match deadline {
            None => {
                // Unconfigured; park until set() or shutdown.
                slot.cond.wait(&mut st);
            }
            Some(target) => {
                if slot.cond.wait_until(&mut st, target).timed_out() {
                    if st.shutdown {
                        break;
                    }
                    st.freerun_us = st.freerun_us.wrapping_add(pending_delta);
                    let now = st.freerun_us;
                    st = dispatch_expired(slot, st, now);
                    if st.interval_us > 0 {
                        pending_delta = u64::from(st.interval_us);
                        deadline =
                            Some(target + Duration::from_micros(u64::from(st.interval_us)));
                    } else {
                        deadline = None;
                    }
                }
                // A notify lands here instead: loop to observe the new
                // configuration or shutdown flag.
            }
        }
    }
    drop(st);
}

/// Create a timebase.
///
/// With `external_sync` absent the tick source is the host clock,
/// configured later through `set`.  The call pends on a startup
/// handshake: the helper thread signals once its tick source is
/// registered, and creation fails if the helper does not come up.
pub fn create(name: &str, external_sync: Option<TimeBaseSync>) -> OsResult<ObjectId> {
    let token = idmap::allocate_new(ObjectType::TimeBase, Some(name))?;
    let idx = token.index();
    let slot = &impl_table()[idx];

    {
        let mut st = slot.lock.lock();
        *st = TimeBaseState {
            accuracy_us: if external_sync.is_some() {
                1
            } else {
                INTERNAL_ACCURACY_US
            },
            external: external_sync,
            ..TimeBaseState::default()
        };
    }

    let spawn_result = thread::Builder::new()
        .name(format!("timebase-{name}"))
        .spawn(move || helper_body(idx));

    let status = match spawn_result {
        Err(err) => {
            debug!(%err, "timebase helper spawn failed");
            Err(OsError::TimerErrUnavailable)
        }
        Ok(handle) => {
            let mut st = slot.lock.lock();
            st.helper = Some(handle);

            let mut attempts = 0;
            while st.reg_state == RegState::NotStarted && attempts < STARTUP_RETRY_LIMIT {
                slot.cond
                    .wait_for(&mut st, Duration::from_millis(100));
                attempts += 1;
            }
            match st.reg_state {
                RegState::Registered => Ok(()),
                _ => {
                    st.shutdown = true;
                    slot.cond.notify_all();
                    let helper = st.helper.take();
                    drop(st);
                    if let Some(h) = helper {
                        let _ = h.join();
                    }
                    Err(OsError::TimerErrInternal)
                }
            }
        }
    };

    idmap::finalize_new(status, token)
}

/// Configure the tick period of an internally-driven timebase.
///
/// `start_us` delays the first tick; `interval_us` spaces subsequent
/// ticks.  Values below the timebase accuracy are rounded up to it.
/// External timebases ignore this call.
pub fn set(timebase_id: ObjectId, start_us: u32, interval_us: u32) -> OsResult<()> {
    let token = idmap::get_by_id(LockMode::Global, ObjectType::TimeBase, timebase_id)?;
    let slot = &impl_table()[token.index()];
    {
        let mut st = slot.lock.lock();
        if st.external.is_none() {
            st.start_us = round_to_accuracy(timebase_id, start_us, st.accuracy_us);
            st.interval_us = round_to_accuracy(timebase_id, interval_us, st.accuracy_us);
            st.config_gen = st.config_gen.wrapping_add(1);
            slot.cond.notify_all();
        }
    }
    drop(token);
    Ok(())
}

fn round_to_accuracy(id: ObjectId, value_us: u32, accuracy_us: u32) -> u32 {
    if value_us > 0 && value_us < accuracy_us {
        debug!(
            %id,
            requested = value_us,
            configured = accuracy_us,
            "interval below timebase accuracy, rounded up"
        );
        accuracy_us
    } else {
        value_us
    }
}

/// Delete a timebase.
///
/// Fails while any timer still references the timebase; deletion never
/// cascades.  The helper thread is stopped and joined before the
/// identity is retired.
pub fn delete(timebase_id: ObjectId) -> OsResult<()> {
    let guard = idmap::get_by_id(LockMode::Global, ObjectType::TimeBase, timebase_id)?;
    let (in_use, own_helper) = {
        let st = impl_table()[guard.index()].lock.lock();
        (
            !st.timers.is_empty(),
            st.helper_thread == Some(thread::current().id()),
        )
    };
    drop(guard);
    if in_use || own_helper {
        // Timers still reference the timebase, or the call came from the
        // timebase's own helper thread (which cannot join itself).
        return Err(OsError::Error);
    }

    let token = idmap::get_by_id(LockMode::Exclusive, ObjectType::TimeBase, timebase_id)?;
    let slot = &impl_table()[token.index()];
    let helper = {
        let mut st = slot.lock.lock();
        st.shutdown = true;
        slot.cond.notify_all();
        st.helper.take()
    };
    if let Some(h) = helper {
        let _ = h.join();
    }
    {
        let mut st = slot.lock.lock();
        *st = TimeBaseState::default();
    }
    idmap::finalize_delete(Ok(()), token)
}

/// Find a timebase by name.
pub fn get_id_by_name(name: &str) -> OsResult<ObjectId> {
    idmap::find_by_name(ObjectType::TimeBase, name)
}

/// Read the free-running counter.
///
/// The counter reflects total time elapsed since timebase inception, in
/// timebase units (microseconds), and rolls over every 2^32 units; for a
/// microsecond timebase that is roughly every 1.2 hours.  Consumers
/// should sample at least twice per rollover and difference consecutive
/// samples.
pub fn get_freerun(timebase_id: ObjectId) -> OsResult<u32> {
    let token = idmap::get_by_id(LockMode::Global, ObjectType::TimeBase, timebase_id)?;
    let freerun = impl_table()[token.index()].lock.lock().freerun_us as u32;
    drop(token);
    Ok(freerun)
}

/// Report the name, creator, and tick configuration of a timebase.
pub fn get_info(timebase_id: ObjectId) -> OsResult<TimeBaseProp> {
    let token = idmap::get_by_id(LockMode::Global, ObjectType::TimeBase, timebase_id)?;
    let (name, creator) = idmap::with_record(&token, |rec| {
        (
            rec.name.map(|n| n.to_string()).unwrap_or_default(),
            rec.creator_id,
        )
    });
    let st = impl_table()[token.index()].lock.lock();
    let prop = TimeBaseProp {
        name,
        creator,
        nominal_interval_time: st.interval_us,
        freerun_time: st.freerun_us as u32,
        accuracy: st.accuracy_us,
    };
    drop(st);
    drop(token);
    Ok(prop)
}

/// Tick accuracy of a timebase, for the timer layer.
pub(crate) fn accuracy_of(timebase_id: ObjectId) -> OsResult<u32> {
    let token = idmap::get_by_id(LockMode::Global, ObjectType::TimeBase, timebase_id)?;
    let accuracy = impl_table()[token.index()].lock.lock().accuracy_us;
    drop(token);
    Ok(accuracy)
}

/// Attach a timer callback to a timebase.  The timer starts disarmed.
pub(crate) fn register_timer(
    timebase_id: ObjectId,
    timer_id: ObjectId,
    callback: TimerCallback,
) -> OsResult<()> {
    let token = idmap::get_by_id(LockMode::Global, ObjectType::TimeBase, timebase_id)?;
    {
        let mut st = impl_table()[token.index()].lock.lock();
        st.timers.push(TimerEntry {
            id: timer_id,
            callback,
            next_expiry: 0,
            interval_us: 0,
            armed: false,
            pending_delete: false,
        });
    }
    drop(token);
    Ok(())
}

/// Arm a registered timer: first expiry `start_us` from now, then every
/// `interval_us` (zero for one-shot).
pub(crate) fn arm_timer(
    timebase_id: ObjectId,
    timer_id: ObjectId,
    start_us: u32,
    interval_us: u32,
) -> OsResult<()> {
    let token = idmap::get_by_id(LockMode::Global, ObjectType::TimeBase, timebase_id)?;
    let slot = &impl_table()[token.index()];
    let result = {
        let mut st = slot.lock.lock();
        let now = st.freerun_us;
        match st.timers.iter_mut().find(|e| e.id == timer_id) {
            Some(entry) => {
                entry.next_expiry = now.wrapping_add(u64::from(start_us));
                entry.interval_us = interval_us;
                entry.armed = true;
                slot.cond.notify_all();
                Ok(())
            }
            None => Err(OsError::InvalidId),
        }
    };
    drop(token);
    result
}

/// Detach a timer from its timebase.
///
/// If the timer's callback is executing on another thread, the call
/// pends until it completes.  Called from within the timer's own
/// callback the removal is deferred to the helper and `Ok(true)` is
/// returned.
pub(crate) fn unregister_timer(timebase_id: ObjectId, timer_id: ObjectId) -> OsResult<bool> {
    let token = idmap::get_by_id(LockMode::Global, ObjectType::TimeBase, timebase_id)?;
    let slot = &impl_table()[token.index()];
    // The identity lock must not be held across the completion wait
    // below: the running callback may itself take it.  The slot storage
    // is static, and only this caller can retire the timer.
    drop(token);

    let mut st = slot.lock.lock();
    if st.dispatching == Some(timer_id) {
        if st.helper_thread == Some(thread::current().id()) {
            // Delete from inside the callback itself.
            if let Some(entry) = st.timers.iter_mut().find(|e| e.id == timer_id) {
                entry.pending_delete = true;
                entry.armed = false;
            }
            return Ok(true);
        }
        while st.dispatching == Some(timer_id) {
            slot.cond.wait(&mut st);
        }
    }
    if let Some(pos) = st.timers.iter().position(|e| e.id == timer_id) {
        st.timers.remove(pos);
    }
    Ok(false)
}
