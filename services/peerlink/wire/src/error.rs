//! Wire protocol error types.

use thiserror::Error;

/// Wire protocol errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Frame length exceeds the configured maximum
    #[error("frame size limit exceeded: {len} > {max}")]
    Size {
        /// Announced or requested payload length
        len: usize,
        /// Configured limit
        max: usize,
    },
}
