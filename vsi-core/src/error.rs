/// Error kinds surfaced by the core, matching the five categories the
/// store can raise: bad arguments, an empty non-blocking fetch, resource
/// exhaustion, on-disk corruption, and fatal I/O failure at init.
#[derive(Debug, thiserror::Error)]
pub enum VsiError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("no data available for domain={domain} key={key}")]
    NoData { domain: u64, key: u64 },

    #[error("out of memory: {0}")]
    OutOfMemory(String),

    #[error("corruption detected: {0}")]
    Corruption(String),

    #[error("I/O error: {0}")]
    IoError(String),
}

impl From<std::io::Error> for VsiError {
    fn from(e: std::io::Error) -> Self {
        VsiError::IoError(e.to_string())
    }
}

pub type VsiResult<T> = Result<T, VsiError>;
