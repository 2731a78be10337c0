use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid participant id: {0:?}")]
    InvalidParticipantId(String),

    #[error("Status record is absent")]
    MissingStatus,

    #[error("Status {0} requires a partner")]
    MissingPartner(&'static str),

    #[error("Malformed signal envelope: {0}")]
    MalformedEnvelope(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
