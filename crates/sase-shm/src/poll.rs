//! Bounded sleep-poll

use crate::{Result, ShmError};
use std::time::{Duration, Instant};

/// Poll cadence and budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Sleep between checks
    pub interval: Duration,
    /// Give up after this long
    pub timeout: Duration,
}

impl PollConfig {
    /// New poll configuration
    pub const fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1),
            timeout: Duration::from_millis(50),
        }
    }
}

/// Call `check` until it yields a value or the budget runs out.
///
/// `check` may also fail, which ends the poll with that error. The check
/// always runs at least once, and once more after the deadline passes.
pub fn poll_until<T>(
    poll: PollConfig,
    what: &'static str,
    mut check: impl FnMut() -> Result<Option<T>>,
) -> Result<T> {
    let start = Instant::now();
    loop {
        if let Some(v) = check()? {
            return Ok(v);
        }
        let elapsed = start.elapsed();
        if elapsed >= poll.timeout {
            // Final look after the deadline
            if let Some(v) = check()? {
                return Ok(v);
            }
            return Err(ShmError::Timeout {
                what,
                waited_ms: elapsed.as_millis() as u64,
            });
        }
        std::thread::sleep(poll.interval.min(poll.timeout - elapsed));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_immediate() {
        let v = poll_until(PollConfig::default(), "value", || Ok(Some(5))).unwrap();
        assert_eq!(v, 5);
    }

    #[test]
    fn test_poll_after_some_tries() {
        let mut n = 0;
        let v = poll_until(
            PollConfig::new(Duration::from_micros(100), Duration::from_secs(1)),
            "third try",
            || {
                n += 1;
                Ok((n == 3).then_some(n))
            },
        )
        .unwrap();
        assert_eq!(v, 3);
    }

    #[test]
    fn test_poll_timeout() {
        let poll = PollConfig::new(Duration::from_millis(1), Duration::from_millis(5));
        let start = Instant::now();
        let err = poll_until::<()>(poll, "never", || Ok(None)).unwrap_err();
        assert!(start.elapsed() >= Duration::from_millis(5));
        assert!(matches!(err, ShmError::Timeout { what: "never", .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_poll_propagates_check_error() {
        let err = poll_until::<()>(PollConfig::default(), "x", || {
            Err(ShmError::InvalidLoadStat(9))
        })
        .unwrap_err();
        assert_eq!(err, ShmError::InvalidLoadStat(9));
    }
}
