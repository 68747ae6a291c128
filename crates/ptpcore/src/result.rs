pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    Parse(ParseError),
    Pool(PoolError),
    Config(ConfigError),
    Send(SendError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    BadLength,
    BadMessageType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    Full,
    DuplicateTag,
}

/// Reasons a configuration snapshot is refused as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    LoggingBits,
    DelayMechanism,
    LogPeriod,
    TransportSpecific,
    TransportType,
    TlvPreset,
    UnknownProfile,
    Truncated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    PoolExhausted,
    QueueFull,
}

pub type SendResult = core::result::Result<(), SendError>;

impl From<ParseError> for Error {
    fn from(err: ParseError) -> Self {
        Error::Parse(err)
    }
}

impl From<PoolError> for Error {
    fn from(err: PoolError) -> Self {
        Error::Pool(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<SendError> for Error {
    fn from(err: SendError) -> Self {
        Error::Send(err)
    }
}

impl From<PoolError> for SendError {
    fn from(_: PoolError) -> Self {
        SendError::PoolExhausted
    }
}
