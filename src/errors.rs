use thiserror::Error;

#[derive(Debug, Error)]
pub enum PinpointError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("LLM provider error: {0}")]
    LlmProvider(String),

    #[error("Perception error: {0}")]
    Perception(String),

    #[error("Accessibility error: {0}")]
    Accessibility(String),

    #[error("No active window")]
    NoActiveWindow,

    #[error("Invalid root window: {0}")]
    InvalidRoot(String),

    /// The widget behind a cached handle no longer exists.
    #[error("Stale element handle: {0}")]
    StaleHandle(String),

    #[error("OCR error: {0}")]
    Ocr(String),

    /// An optional backend (OCR binary, model, platform API) is not installed or configured.
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Window error: {0}")]
    Window(String),

    #[error("Unsupported on this platform: {0}")]
    Unsupported(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("TOML deserialize error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

impl PinpointError {
    /// True when the error only means an optional collaborator is missing.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::BackendUnavailable(_) | Self::Unsupported(_))
    }
}

impl serde::Serialize for PinpointError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        serializer.serialize_str(self.to_string().as_str())
    }
}

pub type PinpointResult<T> = Result<T, PinpointError>;
