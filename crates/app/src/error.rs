//! Errors surfaced to the terminal front end

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Wheel(#[from] spinroom_core::Error),

    #[error(transparent)]
    Store(#[from] spinroom_net::Error),

    #[error("Session has stopped")]
    SessionClosed,
}

pub type Result<T> = std::result::Result<T, Error>;
