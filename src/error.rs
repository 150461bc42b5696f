use thiserror::Error;

/// Faults that abort a run. Per-page and per-listing failures never reach
/// this type; they are absorbed where they happen.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("search page {url} could not be fetched for pagination discovery")]
    PaginationUnavailable { url: String },

    #[error("pagination control not found on {url}")]
    PaginationMissing { url: String },

    #[error("pagination control on {url} has no page entries")]
    PaginationEmpty { url: String },

    #[error("last page label {label:?} is not a page number")]
    PaginationLabel { label: String },

    #[error("unknown city {0:?}")]
    UnknownCity(String),

    #[error("invalid table name {0:?}")]
    InvalidTableName(String),

    #[error("storage: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("http client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    #[error("extraction task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, ScrapeError>;
