// osal-core: Console output engine
//
// Output fragments land in a byte ring guarded by the console mutex.
// In synchronous mode the writer drains straight to the host sink; in
// asynchronous mode a helper task drains the ring and the writer only
// signals data-available.  The helper exits when the global state word
// holds the shutdown sentinel.

use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::config;
use crate::error::{OsError, OsResult};
use crate::host;
use crate::id::{ObjectId, ObjectType};
use crate::idmap::{self, LockMode};

struct ConsoleSlot {
    lock: Mutex<ConsoleState>,
    data_avail: Condvar,
}

#[derive(Default)]
struct ConsoleState {
    buffer: VecDeque<u8>,
    async_mode: bool,
    /// Fragments dropped because the ring was full.
    overruns: u32,
    helper: Option<thread::JoinHandle<()>>,
}

static IMPL: OnceLock<Vec<ConsoleSlot>> = OnceLock::new();

fn impl_table() -> &'static [ConsoleSlot] {
    IMPL.get_or_init(|| {
        (0..config::MAX_CONSOLES)
            .map(|_| ConsoleSlot {
                lock: Mutex::new(ConsoleState::default()),
                data_avail: Condvar::new(),
            })
            .collect()
    })
}

static DEFAULT_CONSOLE: OnceLock<ObjectId> = OnceLock::new();

/// Serializes concurrent `initialize` calls so only one creates the
/// console object.
static INIT_LOCK: Mutex<()> = Mutex::new(());

/// Helper task body: drain the ring to the host sink until shutdown.
fn helper_body(idx: usize) {
    let slot = &impl_table()[idx];
    loop {
        let chunk: Vec<u8> = {
            let mut st = slot.lock.lock();
            while st.buffer.is_empty() {
                if crate::global_state().load(Ordering::Acquire) == config::STATE_SHUTDOWN {
                    return;
                }
                // Bounded wait so the shutdown word is observed even
                // without a final signal.
                slot.data_avail
                    .wait_for(&mut st, Duration::from_millis(250));
            }
            st.buffer.drain(..).collect()
        };
        host::console_write(&chunk);
    }
}

/// Create the console device and, when the host is configured for it,
/// spawn the drain helper.  Called once from `init`.
pub(crate) fn initialize() -> OsResult<ObjectId> {
    let _init_guard = INIT_LOCK.lock();
    if let Some(id) = DEFAULT_CONSOLE.get() {
        return Ok(*id);
    }

    let token = idmap::allocate_new(ObjectType::Console, Some("console"))?;
    let idx = token.index();
    let async_mode = host::capabilities().async_console;

    {
        let mut st = impl_table()[idx].lock.lock();
        *st = ConsoleState {
            async_mode,
            ..ConsoleState::default()
        };
    }

    let status = if async_mode {
        match thread::Builder::new()
            .name("console-helper".into())
            .spawn(move || helper_body(idx))
        {
            Ok(handle) => {
                impl_table()[idx].lock.lock().helper = Some(handle);
                Ok(())
            }
            Err(err) => {
                debug!(%err, "console helper spawn failed");
                Err(OsError::Error)
            }
        }
    } else {
        Ok(())
    };

    let id = idmap::finalize_new(status, token)?;
    let _ = DEFAULT_CONSOLE.set(id);
    Ok(id)
}

/// Queue a text fragment on a console device.
///
/// A fragment that can never fit the ring fails with `OutputTooLarge`.
/// A fragment that does not fit right now is dropped and counted as an
/// overrun rather than blocking the writer.
pub fn write(console_id: ObjectId, text: &str) -> OsResult<()> {
    let token = idmap::get_by_id(LockMode::Refcount, ObjectType::Console, console_id)?;
    let slot = &impl_table()[token.index()];

    let result = {
        let mut st = slot.lock.lock();
        if text.len() > config::CONSOLE_BUFFER_SIZE {
            Err(OsError::OutputTooLarge)
        } else if !st.async_mode {
            host::console_write(text.as_bytes());
            Ok(())
        } else if config::CONSOLE_BUFFER_SIZE - st.buffer.len() < text.len() {
            st.overruns = st.overruns.saturating_add(1);
            debug!(overruns = st.overruns, "console ring full, fragment dropped");
            Ok(())
        } else {
            st.buffer.extend(text.as_bytes());
            slot.data_avail.notify_one();
            Ok(())
        }
    };

    idmap::release(token);
    result
}

/// Queue a text fragment on the default console.
pub fn write_string(text: &str) -> OsResult<()> {
    let id = DEFAULT_CONSOLE
        .get()
        .copied()
        .ok_or(OsError::Error)?;
    write(id, text)
}

/// Stop the drain helper.  Called from `shutdown` after the global state
/// word is set to the shutdown sentinel.
pub(crate) fn stop() {
    let Some(&id) = DEFAULT_CONSOLE.get() else {
        return;
    };
    let Ok(token) = idmap::get_by_id(LockMode::Global, ObjectType::Console, id) else {
        return;
    };
    let slot = &impl_table()[token.index()];
    let helper = {
        let mut st = slot.lock.lock();
        slot.data_avail.notify_all();
        st.helper.take()
    };
    drop(token);
    if let Some(h) = helper {
        let _ = h.join();
    }
}
