use paircall_directory::DirectoryError;
use paircall_media::MediaError;
use paircall_shared::error::ProtocolError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("No current partner")]
    NoPartner,

    #[error("Matchmaker has stopped")]
    ActorGone,
}

pub type Result<T> = std::result::Result<T, ClientError>;
