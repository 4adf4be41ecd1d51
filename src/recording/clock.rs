use std::time::Duration;
use tokio::time::Instant;

/// Stopwatch that only counts while running.
#[derive(Debug, Clone, Default)]
pub struct ActiveClock {
    accumulated: Duration,
    running_since: Option<Instant>,
}

impl ActiveClock {
    /// Reset to zero and start counting.
    pub fn start(&mut self) {
        self.accumulated = Duration::ZERO;
        self.running_since = Some(Instant::now());
    }

    pub fn pause(&mut self) {
        if let Some(since) = self.running_since.take() {
            self.accumulated += since.elapsed();
        }
    }

    pub fn resume(&mut self) {
        if self.running_since.is_none() {
            self.running_since = Some(Instant::now());
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn is_running(&self) -> bool {
        self.running_since.is_some()
    }

    pub fn elapsed(&self) -> Duration {
        self.accumulated + self.running_since.map(|s| s.elapsed()).unwrap_or_default()
    }

    /// Whole seconds of active time.
    pub fn elapsed_secs(&self) -> u64 {
        self.elapsed().as_secs()
    }
}

/// Render seconds as `mm:ss`.
pub fn format_elapsed(secs: u64) -> String {
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    #[tokio::test(start_paused = true)]
    async fn test_paused_time_is_excluded() {
        let mut clock = ActiveClock::default();
        clock.start();
        advance(Duration::from_millis(1500)).await;
        clock.pause();
        advance(Duration::from_secs(10)).await;
        assert_eq!(clock.elapsed(), Duration::from_millis(1500));
        clock.resume();
        advance(Duration::from_millis(700)).await;
        assert_eq!(clock.elapsed(), Duration::from_millis(2200));
        assert_eq!(clock.elapsed_secs(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_pause_and_resume_are_harmless() {
        let mut clock = ActiveClock::default();
        clock.start();
        advance(Duration::from_secs(1)).await;
        clock.pause();
        clock.pause();
        clock.resume();
        clock.resume();
        advance(Duration::from_secs(1)).await;
        assert_eq!(clock.elapsed_secs(), 2);
        clock.reset();
        assert_eq!(clock.elapsed(), Duration::ZERO);
        assert!(!clock.is_running());
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(0), "00:00");
        assert_eq!(format_elapsed(65), "01:05");
        assert_eq!(format_elapsed(3600), "60:00");
    }
}
