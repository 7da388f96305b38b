use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TransferError>;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("connection error: {0}")]
    Connect(String),
    #[error("failed to prepare table {table}: {message}")]
    Schema { table: String, message: String },
    #[error("stored timestamp {value:?} for metric {metric:?} is not parseable")]
    CorruptWatermark { metric: String, value: String },
    #[error("invalid source timestamp {value:?}")]
    SourceTimestamp { value: String },
    #[error("storage error: {0}")]
    Storage(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl From<toml::de::Error> for TransferError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}
