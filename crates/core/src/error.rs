//! Error types for Spinroom Core

use thiserror::Error;

use crate::models::RoomIdError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid room id: {0}")]
    InvalidRoomId(#[from] RoomIdError),

    #[error("Spin intensity must be between 1 and 10, got {0}")]
    InvalidIntensity(u8),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("The wheel is already spinning")]
    AlreadySpinning,

    #[error("Add at least one name before spinning")]
    EmptyWheel,

    #[error("Name cannot be empty")]
    EmptyName,

    #[error("No name at position {index} (wheel has {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Confirmation required")]
    ConfirmationRequired,

    #[error("Invalid spin message: {0}")]
    InvalidSpinMessage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
