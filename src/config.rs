// osal-core: Build-time configuration constants
// One table capacity per object type, plus global tunables

/// Maximum length of a resource name, not counting any terminator.
pub const MAX_API_NAME: usize = 20;

/// Table capacity per object type.
pub const MAX_TASKS: usize = 64;
pub const MAX_QUEUES: usize = 64;
pub const MAX_COUNT_SEMAPHORES: usize = 20;
pub const MAX_BIN_SEMAPHORES: usize = 20;
pub const MAX_MUTEXES: usize = 20;
pub const MAX_OPEN_FILES: usize = 50;
pub const MAX_OPEN_DIRS: usize = 4;
pub const MAX_TIMEBASES: usize = 5;
pub const MAX_TIMERS: usize = 10;
pub const MAX_MODULES: usize = 10;
pub const MAX_FILE_SYSTEMS: usize = 14;
pub const MAX_CONSOLES: usize = 1;
pub const MAX_RWLOCKS: usize = 10;

/// Upper bound for counting semaphore values.
pub const SEM_VALUE_MAX: u32 = 0x7FFF_FFFF;

/// Host-imposed limit on message queue depth.  Queues requesting more than
/// this either fail creation or, with the `permissive-queue` feature, are
/// silently truncated to this depth.
pub const QUEUE_MAX_DEPTH: usize = 1024;

/// Whether over-limit queue depths are truncated instead of rejected.
pub const QUEUE_PERMISSIVE_MODE: bool = cfg!(feature = "permissive-queue");

/// Capacity of the console output ring, in bytes.
pub const CONSOLE_BUFFER_SIZE: usize = 16384;

/// Default stack size handed to the host when a task requests zero.
pub const DEFAULT_STACK_SIZE: usize = 128 * 1024;

/// Ceiling for the backoff used when polling for a table state change,
/// in milliseconds.
pub const STATE_CHANGE_MAX_WAIT_MS: u64 = 100;

/// Process state word values.  Helper tasks observe the state word and
/// exit once it holds the shutdown sentinel.
pub const STATE_RUNNING: u32 = 0x0000_0001;
pub const STATE_SHUTDOWN: u32 = 0xABAD_C0DE;
