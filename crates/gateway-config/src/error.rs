use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("api key not found")]
    KeyNotFound,
    #[error("route not matched")]
    RouteNotMatched,
}
