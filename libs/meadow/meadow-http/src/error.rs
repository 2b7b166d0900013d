use meadow_core::MeadowError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HttpError {
    #[error("bad expression building request: {0}")]
    BadExpression(#[from] meadow_expr::ExprError),

    #[error("request too large: {size} bytes exceeds {limit} byte limit")]
    RequestTooLarge { size: usize, limit: usize },

    #[error("response too large: exceeds {limit} byte limit")]
    ResponseTooLarge { limit: usize },

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("request timed out")]
    Timeout,

    #[error("body encode error: {0}")]
    Encode(String),
}

impl From<HttpError> for MeadowError {
    fn from(e: HttpError) -> Self {
        match e {
            HttpError::BadExpression(err) => MeadowError::BadExpression(err.to_string()),
            HttpError::RequestTooLarge { size, limit } => MeadowError::RequestTooLarge { size, limit },
            HttpError::ResponseTooLarge { limit } => MeadowError::ResponseTooLarge { limit },
            HttpError::InvalidUrl(msg) => MeadowError::BadExpression(msg),
            HttpError::Timeout => MeadowError::Timeout("http request".to_string()),
            HttpError::Network(err) => MeadowError::Network(err.to_string()),
            HttpError::Encode(msg) => MeadowError::Internal(msg),
        }
    }
}
