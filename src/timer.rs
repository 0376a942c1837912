use std::future::Future;
use std::time::Duration;

use tokio::task::AbortHandle;

/// A pending one-shot task started by [`schedule`].
#[derive(Debug)]
pub struct TimerHandle {
    abort: AbortHandle,
}

impl TimerHandle {
    /// Stop the timer if it has not fired yet. Work it already started keeps running.
    pub fn cancel(&self) {
        self.abort.abort();
    }

    #[cfg(test)]
    pub fn is_finished(&self) -> bool {
        self.abort.is_finished()
    }
}

/// Run `task` after `delay` on its own tokio task.
///
/// Cancelling only covers the wait: once the delay has elapsed the task is
/// detached, so a late `cancel` cannot interrupt it half way.
pub fn schedule<F>(delay: Duration, task: F) -> TimerHandle
where
    F: Future<Output = ()> + Send + 'static,
{
    let handle = tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        tokio::spawn(task);
    });
    TimerHandle {
        abort: handle.abort_handle(),
    }
}
