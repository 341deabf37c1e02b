// osal-core: Host capability surface
// Every native-vs-emulated decision is enumerated here, in one place

use std::io::Write;
use std::time::Instant;
use std::sync::OnceLock;

/// What the underlying host provides natively.
///
/// The primitive layers consult this at entry instead of scattering
/// conditional compilation through the call paths.  A capability reported
/// as absent makes the corresponding API return `NotImplemented` rather
/// than silently substituting a different primitive.
#[derive(Debug, Clone, Copy)]
pub struct HostCapabilities {
    /// Host offers a reader-writer lock usable with explicit give/take.
    pub native_rwlock: bool,
    /// Host thread priorities are honored by the scheduler.  When false,
    /// priorities are recorded for bookkeeping only.
    pub priority_scheduling: bool,
    /// Console output is drained by a dedicated helper task rather than
    /// written inside the caller.
    pub async_console: bool,
}

impl Default for HostCapabilities {
    fn default() -> Self {
        HostCapabilities {
            native_rwlock: true,
            priority_scheduling: false,
            async_console: true,
        }
    }
}

static CAPABILITIES: OnceLock<HostCapabilities> = OnceLock::new();

/// Capabilities of the running host.
pub fn capabilities() -> &'static HostCapabilities {
    CAPABILITIES.get_or_init(HostCapabilities::default)
}

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Monotonic reference point shared by the timebase engine.
pub(crate) fn epoch() -> Instant {
    *EPOCH.get_or_init(Instant::now)
}

/// Microseconds elapsed since the process-local epoch.  The reference
/// point is fixed at first use, so differences between samples are
/// meaningful across the whole process lifetime.
pub fn monotonic_micros() -> u64 {
    epoch().elapsed().as_micros() as u64
}

/// Write bytes to the host console sink.  Failures are swallowed; there
/// is nowhere further down to report them.
pub(crate) fn console_write(data: &[u8]) {
    let mut out = std::io::stdout().lock();
    let _ = out.write_all(data);
    let _ = out.flush();
}
