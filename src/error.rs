use std::io;

/// Message returned when no configured sentinel could report a master address.
pub const SENTINELS_UNREACHABLE: &str =
    "redis: all sentinels specified in configuration are unreachable";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid redis configuration: {0}")]
    Config(String),
    #[error("redis client already configured")]
    AlreadyConfigured,
    #[error("dial error: {0}")]
    Dial(#[source] io::Error),
    #[error("{}", SENTINELS_UNREACHABLE)]
    SentinelsUnreachable,
    #[error("redis: connection pool timeout")]
    PoolTimeout,
    #[error("redis: client is closed")]
    Closed,
    #[error("redis error: {0}")]
    Redis(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Wrap a sentinel exhaustion into an `io::Error` so it can travel through
    /// the dial chain and still be recognized by type.
    pub(crate) fn sentinels_unreachable() -> io::Error {
        io::Error::new(io::ErrorKind::NotConnected, Error::SentinelsUnreachable)
    }
}

/// Returns true if `err` reports that every configured sentinel was unreachable.
///
/// Matches the typed error first and falls back to the message text for errors
/// that were flattened to a string along the way.
pub fn is_sentinels_unreachable(err: &io::Error) -> bool {
    let typed = err
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<Error>())
        .is_some_and(|inner| matches!(inner, Error::SentinelsUnreachable));

    typed || err.to_string() == SENTINELS_UNREACHABLE
}
