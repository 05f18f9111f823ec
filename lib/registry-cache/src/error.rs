use thiserror::Error;

pub type Result<T> = std::result::Result<T, CacheError>;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Subscription error: {0}")]
    Subscription(String),

    #[error("Invalid cache configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Kubernetes error: {0}")]
    Kubernetes(#[from] kube::Error),
}
