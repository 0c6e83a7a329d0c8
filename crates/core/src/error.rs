pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid config: {message}")]
    InvalidConfig { message: String },

    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport error: {message}")]
    Transport { message: String },

    #[error("malformed response (http {status}): {message}")]
    MalformedResponse { status: u16, message: String },

    #[error("api error {code}: {message}")]
    Api { code: i32, message: String },
}

impl Error {
    /// Short, stable name of the failure class, used as a log field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "invalid_config",
            Self::InvalidInput { .. } => "invalid_input",
            Self::Io(_) => "io",
            Self::Transport { .. } => "transport",
            Self::MalformedResponse { .. } => "malformed_response",
            Self::Api { .. } => "api",
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport {
            message: e.to_string(),
        }
    }
}
