// osal-core: Timer API
//
// A timer invokes an application callback when its deadline expires,
// one-shot or periodically.  `add` attaches a timer to an existing
// timebase; `create` also provisions a dedicated hidden timebase of the
// same name and retires it with the timer.

use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crate::config;
use crate::error::{OsError, OsResult};
use crate::id::{ObjectId, ObjectType};
use crate::idmap::{self, LockMode};
use crate::timebase;

struct TimerSlot {
    state: Mutex<TimerState>,
}

#[derive(Default)]
struct TimerState {
    timebase_id: ObjectId,
    /// Timebase provisioned by `create` and owned by this timer.
    dedicated: bool,
    start_us: u32,
    interval_us: u32,
    accuracy_us: u32,
}

static IMPL: OnceLock<Vec<TimerSlot>> = OnceLock::new();

fn impl_table() -> &'static [TimerSlot] {
    IMPL.get_or_init(|| {
        (0..config::MAX_TIMERS)
            .map(|_| TimerSlot {
                state: Mutex::new(TimerState::default()),
            })
            .collect()
    })
}

/// Properties reported by `get_info`.
#[derive(Debug, Clone)]
pub struct TimerProp {
    pub name: String,
    pub creator: ObjectId,
    pub start_time: u32,
    pub interval_time: u32,
    pub accuracy: u32,
}

fn attach(
    name: &str,
    timebase_id: ObjectId,
    dedicated: bool,
    callback: impl Fn(ObjectId) + Send + Sync + 'static,
) -> OsResult<ObjectId> {
    let accuracy = timebase::accuracy_of(timebase_id)?;
    let token = idmap::allocate_new(ObjectType::TimeCb, Some(name))?;
    let timer_id = token.id();

    {
        let mut state = impl_table()[token.index()].state.lock();
        *state = TimerState {
            timebase_id,
            dedicated,
            start_us: 0,
            interval_us: 0,
            accuracy_us: accuracy,
        };
    }

    let status = timebase::register_timer(timebase_id, timer_id, Arc::new(callback));
    idmap::finalize_new(status, token)
}

/// Attach a timer to an existing timebase.
///
/// The callback runs on the timebase's helper thread with the timer's id
/// and must therefore be brief and re-entrant-safe; the timer starts
/// disarmed until `set` is called.
pub fn add(
    name: &str,
    timebase_id: ObjectId,
    callback: impl Fn(ObjectId) + Send + Sync + 'static,
) -> OsResult<ObjectId> {
    attach(name, timebase_id, false, callback)
}

/// Create a timer together with a dedicated hidden timebase.
///
/// Returns the timer id and the achievable clock accuracy in
/// microseconds; requested times below that accuracy are rounded up by
/// `set`.
pub fn create(
    name: &str,
    callback: impl Fn(ObjectId) + Send + Sync + 'static,
) -> OsResult<(ObjectId, u32)> {
    let timebase_id = timebase::create(name, None)?;
    let accuracy = timebase::accuracy_of(timebase_id)?;
    match attach(name, timebase_id, true, callback) {
        Ok(timer_id) => Ok((timer_id, accuracy)),
        Err(err) => {
            let _ = timebase::delete(timebase_id);
            Err(err)
        }
    }
}

/// Program the timer: first expiry after `start_us`, then every
/// `interval_us` microseconds.  Zero interval makes it one-shot; both
/// values zero is an error.  Values below the timebase accuracy are
/// rounded up with a debug warning.
pub fn set(timer_id: ObjectId, start_us: u32, interval_us: u32) -> OsResult<()> {
    if start_us == 0 && interval_us == 0 {
        return Err(OsError::Error);
    }

    let token = idmap::get_by_id(LockMode::Global, ObjectType::TimeCb, timer_id)?;
    let (timebase_id, dedicated, accuracy) = {
        let st = impl_table()[token.index()].state.lock();
        (st.timebase_id, st.dedicated, st.accuracy_us)
    };

    let start = round_up(timer_id, start_us, accuracy);
    let interval = round_up(timer_id, interval_us, accuracy);
    {
        let mut st = impl_table()[token.index()].state.lock();
        st.start_us = start;
        st.interval_us = interval;
    }
    drop(token);

    if dedicated {
        // The hidden timebase ticks in lockstep with the timer.
        timebase::set(timebase_id, start, interval)?;
    }
    timebase::arm_timer(timebase_id, timer_id, start, interval)
}

fn round_up(id: ObjectId, value_us: u32, accuracy_us: u32) -> u32 {
    if value_us > 0 && value_us < accuracy_us {
        debug!(
            %id,
            requested = value_us,
            configured = accuracy_us,
            "timer resolution below accuracy, rounded up"
        );
        accuracy_us
    } else {
        value_us
    }
}

/// Delete a timer.
///
/// If the callback is executing the call pends until it completes.
/// Deleting a timer from within its own callback is supported; the
/// removal is deferred until the callback returns.  A dedicated hidden
/// timebase is retired along with the timer.
pub fn delete(timer_id: ObjectId) -> OsResult<()> {
    let token = idmap::get_by_id(LockMode::Exclusive, ObjectType::TimeCb, timer_id)?;
    let (timebase_id, dedicated) = {
        let st = impl_table()[token.index()].state.lock();
        (st.timebase_id, st.dedicated)
    };

    let deferred = match timebase::unregister_timer(timebase_id, timer_id) {
        Ok(deferred) => deferred,
        Err(err) => {
            // Timebase already gone; retire the timer identity anyway.
            idmap::log_nonfatal("timer unregister", err);
            false
        }
    };

    {
        let mut st = impl_table()[token.index()].state.lock();
        *st = TimerState::default();
    }
    idmap::finalize_delete(Ok(()), token)?;

    if dedicated {
        if deferred {
            // Called from the timer's own callback on the hidden
            // timebase; its helper cannot join itself, so the timebase
            // is retired from a reaper thread once the entry drains.
            let _ = thread::Builder::new()
                .name("timer-reaper".into())
                .spawn(move || {
                    for _ in 0..50 {
                        match timebase::delete(timebase_id) {
                            Ok(()) => return,
                            Err(_) => thread::sleep(Duration::from_millis(10)),
                        }
                    }
                    debug!(%timebase_id, "dedicated timebase not reclaimed");
                });
        } else {
            timebase::delete(timebase_id)?;
        }
    }
    Ok(())
}

/// Find a timer by name.
pub fn get_id_by_name(name: &str) -> OsResult<ObjectId> {
    idmap::find_by_name(ObjectType::TimeCb, name)
}

/// Report the name, creator, and programmed times of a timer.
pub fn get_info(timer_id: ObjectId) -> OsResult<TimerProp> {
    let token = idmap::get_by_id(LockMode::Global, ObjectType::TimeCb, timer_id)?;
    let (name, creator) = idmap::with_record(&token, |rec| {
        (
            rec.name.map(|n| n.to_string()).unwrap_or_default(),
            rec.creator_id,
        )
    });
    let st = impl_table()[token.index()].state.lock();
    let prop = TimerProp {
        name,
        creator,
        start_time: st.start_us,
        interval_time: st.interval_us,
        accuracy: st.accuracy_us,
    };
    drop(st);
    drop(token);
    Ok(prop)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_set_rejects_all_zero() {
        let tb = timebase::create("tm_tb_zero", None).unwrap();
        let id = add("tm_zero", tb, |_| {}).unwrap();
        assert_eq!(set(id, 0, 0), Err(OsError::Error));
        delete(id).unwrap();
        timebase::delete(tb).unwrap();
    }

    #[test]
    fn test_periodic_dispatch_counts() {
        let tb = timebase::create("tm_tb_period", None).unwrap();
        timebase::set(tb, 0, 10_000).unwrap();

        let hits = Arc::new(AtomicU32::new(0));
        let hits2 = Arc::clone(&hits);
        let id = add("tm_period", tb, move |_| {
            hits2.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        // Expirations at 20, 50, 80 ms.
        set(id, 20_000, 30_000).unwrap();

        thread::sleep(Duration::from_millis(100));
        assert_eq!(hits.load(Ordering::SeqCst), 3);

        delete(id).unwrap();
        timebase::delete(tb).unwrap();
    }

    #[test]
    fn test_one_shot_fires_once() {
        let tb = timebase::create("tm_tb_oneshot", None).unwrap();
        timebase::set(tb, 0, 5_000).unwrap();

        let hits = Arc::new(AtomicU32::new(0));
        let hits2 = Arc::clone(&hits);
        let id = add("tm_oneshot", tb, move |_| {
            hits2.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        set(id, 10_000, 0).unwrap();

        thread::sleep(Duration::from_millis(80));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        delete(id).unwrap();
        timebase::delete(tb).unwrap();
    }

    #[test]
    fn test_dedicated_timebase_lifecycle() {
        let hits = Arc::new(AtomicU32::new(0));
        let hits2 = Arc::clone(&hits);
        let (id, accuracy) = create("tm_dedicated", move |_| {
            hits2.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        assert!(accuracy > 0);
        // The hidden timebase shares the timer's name.
        let tb = timebase::get_id_by_name("tm_dedicated").unwrap();

        set(id, 10_000, 10_000).unwrap();
        thread::sleep(Duration::from_millis(55));
        assert!(hits.load(Ordering::SeqCst) >= 3);

        delete(id).unwrap();
        // Hidden timebase went with it.
        assert_eq!(
            timebase::get_id_by_name("tm_dedicated"),
            Err(OsError::NameNotFound)
        );
        assert_eq!(timebase::get_info(tb).err(), Some(OsError::InvalidId));
    }

    #[test]
    fn test_delete_from_own_callback_is_deferred() {
        let tb = timebase::create("tm_tb_selfdel", None).unwrap();
        timebase::set(tb, 0, 5_000).unwrap();

        let hits = Arc::new(AtomicU32::new(0));
        let hits2 = Arc::clone(&hits);
        let id = add("tm_selfdel", tb, move |timer| {
            hits2.fetch_add(1, Ordering::SeqCst);
            delete(timer).unwrap();
        })
        .unwrap();
        set(id, 10_000, 10_000).unwrap();

        thread::sleep(Duration::from_millis(80));
        // Fired once, then removed itself.
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(get_info(id).err(), Some(OsError::InvalidId));

        timebase::delete(tb).unwrap();
    }

    #[test]
    fn test_get_info_reports_programmed_times() {
        let tb = timebase::create("tm_tb_info", None).unwrap();
        let id = add("tm_info", tb, |_| {}).unwrap();
        set(id, 20_000, 30_000).unwrap();

        let prop = get_info(id).unwrap();
        assert_eq!(prop.name, "tm_info");
        assert_eq!(prop.start_time, 20_000);
        assert_eq!(prop.interval_time, 30_000);

        delete(id).unwrap();
        timebase::delete(tb).unwrap();
    }
}
