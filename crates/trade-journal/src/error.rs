use market_data::MarketDataError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum JournalError {
    #[error("Invalid {field}: {message}")]
    Validation { field: String, message: String },

    #[error("{resource} not found: {id}")]
    NotFound { resource: &'static str, id: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("External API error: {0}")]
    ExternalApi(String),

    #[error("{0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, JournalError>;

impl JournalError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn not_found(resource: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            resource,
            id: id.to_string(),
        }
    }
}

impl From<MarketDataError> for JournalError {
    fn from(e: MarketDataError) -> Self {
        Self::ExternalApi(e.to_string())
    }
}

impl From<csv::Error> for JournalError {
    fn from(e: csv::Error) -> Self {
        Self::validation("csv", e.to_string())
    }
}
