use thiserror::Error;

// Main Application Error Type

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Buffer Error: {0}")]
    Buffer(#[from] BufferError),
    #[error("Segmentation Error: {0}")]
    Segmentation(#[from] SegmentationError),
    #[error("Composite Error: {0}")]
    Composite(#[from] CompositeError),
    #[error("Session Error: {0}")]
    Session(#[from] SessionError),
    #[error("Transport Error: {0}")]
    Transport(#[from] TransportError),
    #[error("History Error: {0}")]
    History(#[from] HistoryError),
    #[error("Configuration Error: {0}")]
    Config(#[from] ConfigError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    #[error("Buffer of {len} bytes is too small for {width}x{height} with stride {stride}")]
    TooSmall {
        len: usize,
        width: u32,
        height: u32,
        stride: usize,
    },
    #[error("Stride {stride} is shorter than a {width} pixel row")]
    InvalidStride { stride: usize, width: u32 },
    #[error("Buffer dimensions must be non-zero, got {0}x{1}")]
    Empty(u32, u32),
}

// Raised by the segmentation collaborator. The adapter never lets it escape.
#[derive(Error, Debug, Clone)]
pub enum SegmentationError {
    #[error("Segmentation model failed: {0}")]
    Model(String),
    #[error("Segmentation model returned an invalid mask: {0}")]
    InvalidMask(#[from] BufferError),
}

#[derive(Error, Debug)]
pub enum CompositeError {
    #[error("Mask is {mask_width}x{mask_height} but frame is {frame_width}x{frame_height}")]
    DimensionMismatch {
        mask_width: u32,
        mask_height: u32,
        frame_width: u32,
        frame_height: u32,
    },
    #[error("Failed to encode upload image: {0}")]
    Encode(#[from] image::ImageError),
    #[error("Image worker stopped before finishing: {0}")]
    Worker(String),
}

// Failures of the remote analysis collaborator, surfaced to the UI verbatim.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Authentication failed: {0}")]
    Auth(String),
    #[error("Quota exceeded: {0}")]
    Quota(String),
    #[error("Analysis request timed out")]
    Timeout,
    #[error("{0}")]
    Other(String),
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("The selection or frame is no longer available")]
    SelectionLost,
    #[error("Analysis request could not be prepared: {0}")]
    Composite(#[from] CompositeError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("There is no failed analysis to retry")]
    NothingToRetry,
    #[error("Session controller has shut down")]
    ControllerClosed,
}

impl SessionError {
    // Retrying from the current selection can succeed for these.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SessionError::SelectionLost | SessionError::Composite(_) | SessionError::Transport(_)
        )
    }
}

#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("Failed to store history entry: {0}")]
    Storage(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load settings: {0}")]
    Load(#[from] config::ConfigError),
    #[error("Invalid setting: {0}")]
    Invalid(String),
}
