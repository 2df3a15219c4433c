use thiserror::Error;

/// Result type alias for the library.
pub type Result<T> = std::result::Result<T, J3kError>;

/// Main error type for the volumetric codec and its streaming layer.
#[derive(Error, Debug)]
pub enum J3kError {
    /// Volume or tile dimensions are zero, negative, or inconsistent.
    #[error("invalid dimensions: {0}")]
    InvalidDimensions(String),

    /// Component bit depth outside the supported 1..=38 range.
    #[error("invalid bit depth {0}, supported range is 1..=38")]
    InvalidBitDepth(u32),

    /// Component layout does not agree with the owning volume.
    #[error("invalid component configuration: {0}")]
    InvalidComponentConfiguration(String),

    /// A parameter value outside its documented domain.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The codestream does not follow the marker syntax.
    #[error("codestream parse error: {0}")]
    Parse(String),

    /// A codestream feature this implementation does not handle.
    #[error("unsupported feature: {0}")]
    Unsupported(String),

    /// Input ended before a complete segment or payload was read.
    #[error("truncated input: {0}")]
    Truncated(String),

    /// Payload bytes are structurally valid but semantically broken.
    #[error("corrupted data: {0}")]
    Corrupted(String),

    /// Cooperative cancellation was requested.
    #[error("operation cancelled")]
    Cancelled,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Streaming errors.
    /// The client has no open connection.
    #[error("client is not connected")]
    NotConnected,

    /// The client holds no active session.
    #[error("no active session")]
    NoSession,

    /// The server refused a new session because the cap was reached.
    #[error("session limit exceeded, {0} sessions active")]
    SessionLimitExceeded(usize),

    /// The requested volume id is not registered with the server.
    #[error("unknown volume {0:?}")]
    UnknownVolume(String),

    /// A full-volume request exceeds the configured delivery cap.
    #[error("volume too large for full delivery: {size} bytes exceeds cap of {cap}")]
    VolumeTooLarge { size: usize, cap: usize },

    /// The session viewport's frustum provably misses the volume.
    #[error("view frustum does not intersect the volume")]
    EmptyFrustum,

    /// `start` was called while the server is running.
    #[error("server already running")]
    AlreadyRunning,

    /// `stop` was called while the server is stopped.
    #[error("server not running")]
    NotRunning,

    /// A streaming request carried a malformed region.
    #[error("invalid region: {0}")]
    InvalidRegion(String),
}

impl J3kError {
    /// Whether this error indicates malformed input rather than misuse.
    pub fn is_data_error(&self) -> bool {
        matches!(
            self,
            Self::Parse(_) | Self::Truncated(_) | Self::Corrupted(_)
        )
    }
}
