//! Shared utility functions.

use tokio::task::spawn_blocking;
use tokio_util::sync::CancellationToken;

use crate::{pklog, Error, Result};

pub async fn blocking<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    spawn_blocking(f)
        .await
        .map_err(|e| Error::TaskJoin(e.to_string()))
}

/// Cancel `token` on the first Ctrl-C. Returns once the token is cancelled
/// by either side.
pub async fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if signal.is_ok() {
                pklog!("Interrupt received, cancelling execution");
                token.cancel();
            }
        }
        _ = token.cancelled() => {}
    }
}
