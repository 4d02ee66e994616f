use std::fmt;

/// Failure taxonomy. Each kind maps to exactly one process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Auth,
    Generation,
    RemoteApi,
    State,
    Unexpected,
}

impl ErrorKind {
    pub fn exit_code(self) -> u8 {
        match self {
            ErrorKind::Auth => 1,
            ErrorKind::Generation => 2,
            ErrorKind::RemoteApi => 3,
            ErrorKind::State => 4,
            ErrorKind::Unexpected => 99,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ErrorKind::Auth => "authentication error",
            ErrorKind::Generation => "Brewfile generation error",
            ErrorKind::RemoteApi => "Gist API error",
            ErrorKind::State => "state error",
            ErrorKind::Unexpected => "unexpected error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    msg: String,
}

impl Error {
    pub fn new<M: Into<String>>(kind: ErrorKind, msg: M) -> Self {
        Self {
            kind,
            msg: msg.into(),
        }
    }

    pub fn msg<M: Into<String>>(msg: M) -> Self {
        Self::new(ErrorKind::Unexpected, msg)
    }

    pub fn auth<M: Into<String>>(msg: M) -> Self {
        Self::new(ErrorKind::Auth, msg)
    }

    pub fn generation<M: Into<String>>(msg: M) -> Self {
        Self::new(ErrorKind::Generation, msg)
    }

    pub fn api<M: Into<String>>(msg: M) -> Self {
        Self::new(ErrorKind::RemoteApi, msg)
    }

    pub fn state<M: Into<String>>(msg: M) -> Self {
        Self::new(ErrorKind::State, msg)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.msg
    }

    pub fn exit_code(&self) -> u8 {
        self.kind.exit_code()
    }

    /// Re-tag an error at a component boundary, keeping its message.
    pub fn with_kind(mut self, kind: ErrorKind) -> Self {
        self.kind = kind;
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.msg)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::msg(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::state(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::msg(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
