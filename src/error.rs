use thiserror::Error;

/// Errors reported by this crate and passed through from the transport.
#[derive(Debug, Error)]
pub enum Error {
    /// The transport runtime has not been started.
    #[error("transport runtime is not initialized")]
    NotInitialized,

    /// No matching camera was found.
    #[error("no matching camera found")]
    NotFound,

    /// A numeric input was zero or otherwise invalid before any transport call.
    #[error("bad parameter: {0}")]
    BadParameter(&'static str),

    /// The operation is forbidden while capture is active.
    #[error("operation not permitted while capture is active")]
    Busy,

    /// Memory or transport resources could not be allocated.
    #[error("resource allocation failed: {0}")]
    Resources(String),

    /// An invariant the device family guarantees was violated.
    #[error("internal fault: {0}")]
    InternalFault(String),

    /// A value was rejected by validation or by the transport.
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// A transport operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// The feature or operation is not supported by this device.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Any other transport-reported failure.
    #[error("transport error: {0}")]
    Transport(String),
}

pub type Result<T> = std::result::Result<T, Error>;
