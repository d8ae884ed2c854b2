use thiserror::Error;

/// Failures on the broker socket. None of these are fatal: the relay turns
/// every one of them into a reconnect or a dropped command.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Connection failed: {0}")]
    Connect(String),
    #[error("Send failed: {0}")]
    Send(String),
    #[error("Receive failed: {0}")]
    Receive(String),
    #[error("Not connected")]
    NotConnected,
}
