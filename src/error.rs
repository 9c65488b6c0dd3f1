use thiserror::Error;

#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: String, available: String },
    #[error("Insufficient reward balance: required {required} units, available {available}")]
    InsufficientRewardBalance { required: String, available: String },
    #[error("Authorization required between buyer and counterparty")]
    AuthorizationRequired,
    #[error("External gateway error: {0}")]
    ExternalGatewayError(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Storage error: {0}")]
    StorageError(String),
    #[error("Internal error: {0}")]
    InternalError(#[from] Box<dyn std::error::Error + Send + Sync>),
    #[cfg(feature = "storage-rocksdb")]
    #[error("RocksDB error: {0}")]
    RocksDbError(#[from] rocksdb::Error),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl PaymentError {
    /// Stable machine-readable code surfaced to API callers.
    pub fn code(&self) -> &'static str {
        match self {
            PaymentError::ValidationError(_) => "VALIDATION_ERROR",
            PaymentError::NotFound(_) => "NOT_FOUND",
            PaymentError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            PaymentError::InsufficientRewardBalance { .. } => "INSUFFICIENT_REWARD_BALANCE",
            PaymentError::AuthorizationRequired => "AUTHORIZATION_REQUIRED",
            PaymentError::ExternalGatewayError(_) => "EXTERNAL_GATEWAY_ERROR",
            PaymentError::Conflict(_) => "CONFLICT",
            PaymentError::StorageError(_) => "STORAGE_ERROR",
            #[cfg(feature = "storage-rocksdb")]
            PaymentError::RocksDbError(_) => "STORAGE_ERROR",
            PaymentError::InternalError(_) | PaymentError::CsvError(_) | PaymentError::IoError(_) => {
                "INTERNAL_ERROR"
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, PaymentError>;
