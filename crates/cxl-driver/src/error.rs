//! Error types for AFU access

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for AFU operations
pub type Result<T> = std::result::Result<T, CxlError>;

/// Errors that can occur while enumerating, opening or driving an AFU
///
/// Running off the end of an enumeration is not an error; iterators simply
/// return `None`. A successfully read event of the wrong kind is not an error
/// either, see [`crate::ExpectOutcome`].
#[derive(Debug, Error)]
pub enum CxlError {
    /// A system call failed; the OS error is preserved unchanged
    #[error("{context}: {source}")]
    ResourceUnavailable {
        /// What was being attempted
        context: String,
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },

    /// The kernel speaks a newer API than this library
    #[error("Kernel API version {reported} is newer than supported version {supported}")]
    ProtocolIncompatible {
        /// `api_version_compatible` reported by the kernel
        reported: i64,
        /// Highest version this library supports
        supported: i64,
    },

    /// Operation attempted in the wrong lifecycle state
    #[error("AFU in invalid state: {state}")]
    InvalidState {
        /// Description of the conflicting state
        state: String,
    },

    /// MMIO is not mapped, or cannot be mapped yet
    #[error("Device not ready: {reason}")]
    DeviceNotReady {
        /// Reason for failure
        reason: String,
    },

    /// No device node matches the requested view or identity
    #[error("Device not found: {path}")]
    DeviceNotFound {
        /// Path or identity that was looked up
        path: PathBuf,
    },

    /// The descriptor or path does not refer to a character device
    #[error("Not a character device: {path}")]
    NotCharDevice {
        /// Offending path
        path: PathBuf,
    },

    /// Reading events from the descriptor failed
    #[error("Event read failed: {source}")]
    EventIo {
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The descriptor returned no data (end of file or nothing pending)
    #[error("No event data available")]
    NoData,

    /// A buffered event declares a size that does not fit
    #[error("Malformed event: declared size {declared}, {available} bytes available")]
    MalformedEvent {
        /// Size field of the frame
        declared: usize,
        /// Bytes left in the buffer (or in one event record)
        available: usize,
    },

    /// Register offset rejected before touching memory
    #[error("Invalid register offset {offset:#x}: {reason}")]
    InvalidOffset {
        /// Offset in register units
        offset: u64,
        /// Why it was rejected
        reason: &'static str,
    },

    /// Argument outside the range the kernel accepts
    #[error("Invalid argument: {reason}")]
    InvalidArgument {
        /// Reason for rejection
        reason: String,
    },

    /// A sysfs attribute could not be parsed
    #[error("Bad attribute {}: {reason}", path.display())]
    Attribute {
        /// Attribute file
        path: PathBuf,
        /// What was wrong with its contents
        reason: String,
    },
}

impl CxlError {
    /// Wrap an OS error with context
    pub fn resource(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::ResourceUnavailable {
            context: context.into(),
            source,
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(state: impl Into<String>) -> Self {
        Self::InvalidState {
            state: state.into(),
        }
    }

    /// Create a device not ready error
    pub fn device_not_ready(reason: impl Into<String>) -> Self {
        Self::DeviceNotReady {
            reason: reason.into(),
        }
    }

    /// Create a device not found error
    pub fn device_not_found(path: impl Into<PathBuf>) -> Self {
        Self::DeviceNotFound { path: path.into() }
    }

    /// Create an invalid argument error
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Create an attribute parse error
    pub fn attribute(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Attribute {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// OS error number behind this error, when there is one
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::ResourceUnavailable { source, .. } | Self::EventIo { source } => {
                source.raw_os_error()
            }
            _ => None,
        }
    }

    /// `true` when the failure came from the I/O layer of an event read
    pub const fn is_event_io(&self) -> bool {
        matches!(self, Self::EventIo { .. } | Self::NoData)
    }
}
