use thiserror::Error;

#[derive(Error, Debug)]
pub enum EventBusError {
    #[error("Event handler failed: {0}")]
    HandlerFailed(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}
