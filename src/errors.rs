use thiserror::Error;

/// WebSocket-specific errors
#[derive(Error, Debug, Clone)]
pub enum WsError {
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Send error: {0}")]
    Send(String),
    #[error("Stream closed by peer")]
    Closed,
}

/// Parsing and serialization errors
#[derive(Error, Debug, Clone)]
pub enum ParseError {
    #[error("JSON error: {0}")]
    Json(String),
    #[error("MessagePack error: {0}")]
    MsgPack(String),
    #[error("Invalid float string: {0}")]
    FloatString(String),
}

/// Main engine error type
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// WebSocket transport error
    #[error("Websocket error: {0}")]
    Ws(#[from] WsError),

    /// Upstream payload could not be parsed
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// HTTP error from the REST poller
    #[error("HTTP error (status {status}): {message}")]
    Http { status: u16, message: String },

    /// Generic request error (DNS, TLS, timeout)
    #[error("Request error: {0}")]
    Request(String),

    /// Filesystem error from the log sink or loader
    #[error("Io error: {0}")]
    Io(String),

    /// Configuration file error
    #[error("Config error: {0}")]
    Config(String),

    /// Observer transport could not be bound (fatal at startup)
    #[error("Bind error on {addr}: {message}")]
    Bind { addr: String, message: String },
}

impl Error {
    /// Create an HTTP error from a status code and body
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Error::Http {
            status,
            message: message.into(),
        }
    }

    /// Create a WebSocket connection error
    pub fn ws_connection(msg: impl Into<String>) -> Self {
        Error::Ws(WsError::Connection(msg.into()))
    }

    /// Create a JSON parse error
    pub fn json_parse(msg: impl Into<String>) -> Self {
        Error::Parse(ParseError::Json(msg.into()))
    }

    /// Create an io error
    pub fn io(err: &std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}
