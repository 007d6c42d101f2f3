use thiserror::Error;

/// Errors reported by the capture controller and its collaborators.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// The operation is not legal in the current capture/recording state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// An overlay context or pixel buffer could not be created at the requested size.
    #[error("allocation failed: {0}")]
    AllocationFailed(String),

    /// The camera or microphone could not be opened, configured, or was lost.
    #[error("device error: {0}")]
    DeviceError(String),

    /// Writing or finalizing the recording container failed.
    #[error("mux error: {0}")]
    MuxError(String),

    /// The overlay update callback failed.
    #[error("render failed: {0}")]
    RenderFailed(String),

    #[error("configuration failed: {0}")]
    ConfigurationFailed(String),

    #[error("storage error: {0}")]
    StorageError(String),

    #[error("no composited frame available")]
    NoFrameAvailable,
}

impl CaptureError {
    pub(crate) fn invalid_state(operation: &str, state: impl std::fmt::Debug) -> Self {
        Self::InvalidState(format!("cannot {} while {:?}", operation, state))
    }
}
