use reality_store::StoreError;
use thiserror::Error;

/// Error taxonomy (§7). Every variant maps to exactly one HTTP status; the
/// mapping lives in [`ProtocolError::status_code`] rather than scattered
/// across handlers so the taxonomy stays in one place.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("route not found")]
    NotFound,
    #[error("method not allowed")]
    MethodNotAllowed,
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
    #[error("internal error")]
    Internal,
    #[error("service unhealthy")]
    Unhealthy,
}

impl ProtocolError {
    pub fn status_code(&self) -> u16 {
        match self {
            ProtocolError::Validation(_) => 400,
            ProtocolError::NotFound => 404,
            ProtocolError::MethodNotAllowed => 405,
            ProtocolError::Storage(_) => 500,
            ProtocolError::Internal => 500,
            ProtocolError::Unhealthy => 503,
        }
    }

    /// Message placed in the `{error}` envelope. Internal/storage causes are
    /// logged by the caller but never echoed back to the client (§7).
    pub fn client_message(&self) -> String {
        match self {
            ProtocolError::Validation(msg) => msg.clone(),
            ProtocolError::NotFound => "not found".to_string(),
            ProtocolError::MethodNotAllowed => "method not allowed".to_string(),
            ProtocolError::Storage(_) => "internal error".to_string(),
            ProtocolError::Internal => "internal error".to_string(),
            ProtocolError::Unhealthy => "service unhealthy".to_string(),
        }
    }
}
