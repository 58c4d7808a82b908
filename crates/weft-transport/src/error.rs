//! Transport error types.

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,

    #[error("transport not opened")]
    NotOpened,

    #[error("channel {0:?} was not declared at open")]
    UndeclaredChannel(String),
}
