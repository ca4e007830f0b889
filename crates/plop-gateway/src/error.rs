use thiserror::Error;

/// Why a frame could not be handed to a connection's writer.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("connection closed")]
    Closed,

    #[error("connection outbound buffer full")]
    Full,
}
