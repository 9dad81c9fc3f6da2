use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;

/// A spawned task that is aborted when the handle is dropped.
///
/// Replacing or clearing the `Option<ScopedTask>` that holds a timer cancels
/// it, so a torn-down loop can never fire again.
pub struct ScopedTask(JoinHandle<()>);

impl ScopedTask {
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self(tokio::spawn(future))
    }

    /// Run `on_tick` every `period`, first after one full period.
    /// Stops once `on_tick` returns `false`.
    pub fn every<F, Fut>(period: Duration, mut on_tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        Self::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut interval = tokio::time::interval_at(start, period);
            loop {
                interval.tick().await;
                if !on_tick().await {
                    break;
                }
            }
        })
    }

    pub fn is_finished(&self) -> bool {
        self.0.is_finished()
    }
}

impl Drop for ScopedTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}
