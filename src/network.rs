//! Consumed transport interfaces
//!
//! Transport and authentication live outside this crate; the streaming core
//! only needs a way to fetch binary blobs and JSON documents relative to a
//! model's base URL. Failures surface as [`HttpError`] with status code and
//! headers.

use futures::future::BoxFuture;
use serde_json::Value;

use crate::error::HttpError;

/// Fetches binary files belonging to a model
pub trait BinaryFileProvider: Send + Sync {
    /// Fetch `file_name` relative to `base_url`
    fn get_binary_file(
        &self,
        base_url: &str,
        file_name: &str,
    ) -> BoxFuture<'static, Result<Vec<u8>, HttpError>>;
}

/// Fetches model files, binary and JSON
pub trait ModelDataProvider: BinaryFileProvider {
    /// Fetch and decode a JSON document relative to `base_url`
    fn get_json_file(
        &self,
        base_url: &str,
        file_name: &str,
    ) -> BoxFuture<'static, Result<Value, HttpError>>;
}

/// Run a fallible async operation up to `attempts` times
///
/// Returns the first success, or the last error once attempts are exhausted.
/// There is no backoff; a transiently failing fetch is simply reissued.
pub async fn retried<T, E, F, Fut>(attempts: usize, what: &str, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < attempts => {
                log::warn!("retrying {what} ({attempt}/{attempts}): {err}");
            }
            Err(err) => return Err(err),
        }
    }
}
