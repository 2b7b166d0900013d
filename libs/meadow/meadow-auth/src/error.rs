use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("auth flow execution failed: {0}")]
    FlowFailed(String),

    #[error("token path {path:?} did not resolve to a string")]
    TokenNotFound { path: String },

    #[error("bad expression: {0}")]
    BadExpression(#[from] meadow_expr::ExprError),
}
