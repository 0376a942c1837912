use std::future::Future;
use std::time::Duration;

use log::warn;

use crate::error::TransportError;

/// Extra time added on top of the wait the platform reports.
pub const FLOOD_WAIT_MARGIN: Duration = Duration::from_secs(1);

/// Run `op`, sleeping and retrying for as long as the transport answers with a flood wait.
///
/// Any other error is returned to the caller untouched.
pub async fn with_flood_retry<T, F, Fut>(what: &str, mut op: F) -> Result<T, TransportError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TransportError>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Err(TransportError::FloodWait { seconds }) => {
                attempt += 1;
                let delay = Duration::from_secs(seconds) + FLOOD_WAIT_MARGIN;
                warn!(
                    "Flood wait on {} (attempt {}), sleeping {:?}",
                    what, attempt, delay
                );
                tokio::time::sleep(delay).await;
            }
            other => return other,
        }
    }
}
