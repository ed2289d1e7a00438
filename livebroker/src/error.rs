use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

/// An error setting up a broker. Errors that happen while a broker is running
/// are either retried ([`PushError`][crate::push::PushError]) or delivered to
/// subscribers ([`CallFailure`][crate::rpc::CallFailure]).
#[derive(Debug)]
pub enum Error {
    Config(String),
    Io(std::io::Error),
    Parse(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(s) => write!(f, "invalid configuration: {s}"),
            Error::Io(e) => write!(f, "io error: {e}"),
            Error::Parse(s) => write!(f, "parse error: {s}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<String> for Error {
    fn from(value: String) -> Self {
        Error::Config(value)
    }
}

impl From<&str> for Error {
    fn from(value: &str) -> Self {
        Error::Config(value.to_owned())
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Error::Io(value)
    }
}

impl From<toml::de::Error> for Error {
    fn from(value: toml::de::Error) -> Self {
        Error::Parse(value.to_string())
    }
}
