// osal-core: Closed result-code set shared by every API surface

use thiserror::Error;

/// Result type for all OSAL operations.
pub type OsResult<T> = Result<T, OsError>;

/// The closed set of OSAL failure codes.
///
/// Every public call reports failure through exactly one of these values;
/// no error is propagated through any side channel other than the
/// debug-level trace log.  Output values are only meaningful when the
/// call returns `Ok`.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsError {
    /// Unspecified failure.
    #[error("operation failed")]
    Error,

    /// A required reference argument was absent or unusable.
    #[error("invalid pointer argument")]
    InvalidPointer,

    /// Resource name exceeds the configured maximum length.
    #[error("name too long")]
    NameTooLong,

    /// No resource with the given name exists.
    #[error("name not found")]
    NameNotFound,

    /// A resource of this type already uses the given name.
    #[error("name already in use")]
    NameTaken,

    /// The type table has no free slots left.
    #[error("no free object ids")]
    NoFreeIds,

    /// The id does not refer to an active resource.
    #[error("invalid object id")]
    InvalidId,

    /// The id refers to a different object type than requested.
    #[error("incorrect object type")]
    IncorrectObjType,

    /// A size argument is out of the accepted range.
    #[error("invalid size")]
    InvalidSize,

    /// The operation is not supported on this object.
    #[error("operation not supported")]
    OperationNotSupported,

    /// Output exceeds the capacity of the destination.
    #[error("output too large")]
    OutputTooLarge,

    /// The facility is not implemented on this host.
    #[error("not implemented")]
    NotImplemented,

    /// An address argument is misaligned or out of range.
    #[error("bad address")]
    BadAddress,

    /// The operation matched no objects.
    #[error("empty set")]
    EmptySet,

    /// Transient contention; the caller may retry.
    #[error("resource busy, try again")]
    TryAgain,

    /// Non-blocking get found the queue empty.
    #[error("queue empty")]
    QueueEmpty,

    /// Non-blocking put found the queue full.
    #[error("queue full")]
    QueueFull,

    /// Blocking queue operation timed out.
    #[error("queue timeout")]
    QueueTimeout,

    /// Message size out of range for the queue, or the received message
    /// was truncated to fit the caller's buffer.
    #[error("queue invalid size")]
    QueueInvalidSize,

    /// Semaphore operation failed (busy, destroyed, or host refusal).
    #[error("semaphore failure")]
    SemFailure,

    /// Semaphore take timed out.
    #[error("semaphore timeout")]
    SemTimeout,

    /// Semaphore initial/maximum value out of range.
    #[error("invalid semaphore value")]
    InvalidSemValue,

    /// Timer start and interval arguments are both unusable.
    #[error("invalid timer arguments")]
    TimerErrInvalidArgs,

    /// The host timer facility reported an internal error.
    #[error("timer internal error")]
    TimerErrInternal,

    /// No timer resources available from the host.
    #[error("timer unavailable")]
    TimerErrUnavailable,

    /// The path is not a valid virtual filesystem path.
    #[error("invalid filesystem path")]
    FsErrPathInvalid,

    /// No filesystem drive has been created for the path.
    #[error("filesystem drive not created")]
    FsErrDriveNotCreated,
}
