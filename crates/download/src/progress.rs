use std::time::Duration;

use {async_trait::async_trait, tokio::time::Instant};

/// Point-in-time view of one transfer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSnapshot {
    /// Bytes on disk, including the resume offset.
    pub downloaded: u64,
    /// Expected final size, if the server told us.
    pub total: Option<u64>,
    /// Time since this invocation of the engine started.
    pub elapsed: Duration,
    /// Bytes received during this invocation (excludes the resume offset).
    pub session_bytes: u64,
}

impl ProgressSnapshot {
    /// Completion in `0.0..=100.0`, or `None` when the total is unknown or zero.
    pub fn percent(&self) -> Option<f64> {
        match self.total {
            Some(total) if total > 0 => {
                Some((self.downloaded as f64 / total as f64 * 100.0).min(100.0))
            },
            _ => None,
        }
    }

    /// Average bytes per second over this invocation.
    pub fn speed(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.session_bytes as f64 / secs
        } else {
            0.0
        }
    }

    /// Time left at the current average speed. `None` when the total is
    /// unknown or nothing has been received yet.
    pub fn eta(&self) -> Option<Duration> {
        let total = self.total?;
        let speed = self.speed();
        if speed <= 0.0 {
            return None;
        }
        let remaining = total.saturating_sub(self.downloaded);
        Some(Duration::from_secs_f64(remaining as f64 / speed))
    }
}

/// Receives throttled snapshots while a transfer runs.
///
/// Implementations handle their own failures: a sink can never abort the
/// transfer that feeds it.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn report(&self, snapshot: ProgressSnapshot);
}

/// Sink that drops every snapshot.
pub struct NoProgress;

#[async_trait]
impl ProgressSink for NoProgress {
    async fn report(&self, _snapshot: ProgressSnapshot) {}
}

/// Gate that opens at most once per `interval`, measured from the previous
/// opening (or from construction for the first one).
#[derive(Debug)]
pub(crate) struct Throttle {
    interval: Duration,
    last: Instant,
}

impl Throttle {
    pub(crate) fn new(interval: Duration, start: Instant) -> Self {
        Self {
            interval,
            last: start,
        }
    }

    pub(crate) fn ready(&mut self, now: Instant) -> bool {
        if now.saturating_duration_since(self.last) >= self.interval {
            self.last = now;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(downloaded: u64, total: Option<u64>, secs: u64, session: u64) -> ProgressSnapshot {
        ProgressSnapshot {
            downloaded,
            total,
            elapsed: Duration::from_secs(secs),
            session_bytes: session,
        }
    }

    #[test]
    fn percent_handles_unknown_and_zero_totals() {
        assert_eq!(snap(50, Some(200), 1, 50).percent(), Some(25.0));
        assert_eq!(snap(50, None, 1, 50).percent(), None);
        assert_eq!(snap(0, Some(0), 1, 0).percent(), None);
        assert_eq!(snap(300, Some(200), 1, 300).percent(), Some(100.0));
    }

    #[test]
    fn speed_ignores_resume_offset() {
        // 20 bytes were already on disk; 30 arrived in 3 seconds.
        let s = snap(50, Some(100), 3, 30);
        assert_eq!(s.speed(), 10.0);
        assert_eq!(s.eta(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn speed_and_eta_at_time_zero() {
        let s = snap(0, Some(100), 0, 0);
        assert_eq!(s.speed(), 0.0);
        assert_eq!(s.eta(), None);
    }

    #[test]
    fn eta_unknown_without_total() {
        assert_eq!(snap(10, None, 1, 10).eta(), None);
    }

    #[test]
    fn throttle_opens_once_per_interval() {
        let start = Instant::now();
        let mut t = Throttle::new(Duration::from_secs(3), start);
        assert!(!t.ready(start));
        assert!(!t.ready(start + Duration::from_millis(2999)));
        assert!(t.ready(start + Duration::from_secs(3)));
        assert!(!t.ready(start + Duration::from_secs(4)));
        assert!(t.ready(start + Duration::from_secs(6)));
    }
}
