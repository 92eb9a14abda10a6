use thiserror::Error;

/// Errors raised while turning a client frame into a typed event.
///
/// None of these are fatal to the connection: the read pump reports them
/// back to the client as an `error` event and keeps reading.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("invalid JSON: {0}")]
    MalformedEnvelope(#[from] serde_json::Error),

    #[error("this event type is not supported: {0}")]
    UnsupportedEvent(String),

    #[error("invalid payload for {kind}: {reason}")]
    InvalidPayload { kind: String, reason: String },
}
