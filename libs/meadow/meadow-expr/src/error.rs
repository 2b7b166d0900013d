use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExprError {
    #[error("bad expression at position {pos}: {message}")]
    BadExpression { pos: usize, message: String },
}

impl ExprError {
    pub fn at(pos: usize, message: impl Into<String>) -> Self {
        Self::BadExpression {
            pos,
            message: message.into(),
        }
    }
}
