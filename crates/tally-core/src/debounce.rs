use std::time::Duration;

use tokio::time::{Instant, sleep_until};

/// Trailing-edge debounce: every `touch` pushes the deadline out, and
/// `fired` resolves once the input has been quiet for `delay`.
#[derive(Debug, Clone)]
pub struct Debounce {
    delay: Duration,
    deadline: Option<Instant>,
}

impl Debounce {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadline: None,
        }
    }

    pub fn touch(&mut self) {
        self.deadline = Some(Instant::now() + self.delay);
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// Drops a pending deadline. Returns whether one was pending.
    pub fn take(&mut self) -> bool {
        self.deadline.take().is_some()
    }

    /// Waits for the pending deadline and clears it. Never resolves when
    /// nothing is pending.
    pub async fn fired(&mut self) {
        match self.deadline {
            Some(deadline) => {
                sleep_until(deadline).await;
                self.deadline = None;
            }
            None => std::future::pending::<()>().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::{Instant, advance, timeout};

    use super::Debounce;

    #[tokio::test(start_paused = true)]
    async fn fires_after_quiet_period() {
        let mut debounce = Debounce::new(Duration::from_millis(150));
        let start = Instant::now();
        debounce.touch();
        debounce.fired().await;
        assert_eq!(start.elapsed(), Duration::from_millis(150));
        assert!(!debounce.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn touch_pushes_deadline_out() {
        let mut debounce = Debounce::new(Duration::from_millis(150));
        let start = Instant::now();
        debounce.touch();
        advance(Duration::from_millis(100)).await;
        debounce.touch();
        debounce.fired().await;
        assert_eq!(start.elapsed(), Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_debounce_never_fires() {
        let mut debounce = Debounce::new(Duration::from_millis(150));
        assert!(
            timeout(Duration::from_secs(5), debounce.fired())
                .await
                .is_err()
        );

        debounce.touch();
        assert!(debounce.take());
        assert!(!debounce.is_pending());
    }
}
