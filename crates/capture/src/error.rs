use thiserror::Error;

pub type Result<T> = std::result::Result<T, CaptureError>;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("configuration error: {0}")]
    Config(#[from] endpoint_protocol::OptionsError),

    #[error("storage error: {0}")]
    Store(#[from] endpoint_store::StoreError),

    #[error("invalid URL gate: {0}")]
    Gate(#[from] regex::Error),
}
