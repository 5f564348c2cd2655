//! Application-wide error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrderError {
    /// The transition table forbids the requested change for this actor and state.
    #[error("Transition not allowed")]
    TransitionDenied,

    /// The settlement of this invoice has already been booked.
    #[error("Invoice {0} has already been booked")]
    AlreadyBooked(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not found")]
    NotFound,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Password hashing error: {0}")]
    Password(#[from] bcrypt::BcryptError),

    #[error("Payment provider error: {0}")]
    Provider(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl OrderError {
    /// Message shown to a Client.
    ///
    /// Denied transitions, validation failures and unknown identifiers all read
    /// the same, so a Client cannot probe which collections exist or which state
    /// they are in. The Store sees the full `Display` text instead.
    pub fn client_message(&self) -> String {
        match self {
            Self::TransitionDenied | Self::Validation(_) | Self::NotFound => {
                "not found or not allowed".to_string()
            }
            other => other.to_string(),
        }
    }

    /// `true` if the error means the operation was refused rather than failed.
    pub fn is_refusal(&self) -> bool {
        matches!(
            self,
            Self::TransitionDenied | Self::AlreadyBooked(_) | Self::Validation(_) | Self::NotFound
        )
    }
}

pub type Result<T> = std::result::Result<T, OrderError>;
