//! Remote I/O: bounded retries and scene asset downloads.

mod fetcher;
mod retry;

pub use fetcher::{AssetFetcher, HttpAssetFetcher};
pub use retry::{
    is_retryable_status, with_retry, Attempt, RetryError, RetryPolicy, DEFAULT_BASE_BACKOFF,
    DEFAULT_MAX_ATTEMPTS, DEFAULT_TIMEOUT,
};
