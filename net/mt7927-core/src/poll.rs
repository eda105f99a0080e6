//! Bounded polling

use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Upper bound for one poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollBound {
    /// Number of reads before giving up
    pub iterations: u32,
    /// Sleep between two reads, in microseconds
    pub interval_us: u64,
}

impl PollBound {
    pub const fn new(iterations: u32, interval_us: u64) -> Self {
        Self {
            iterations,
            interval_us,
        }
    }

    /// Worst-case wall time spent in the loop.
    pub fn budget(&self) -> Duration {
        Duration::from_micros(self.interval_us.saturating_mul(self.iterations as u64))
    }

    /// Read with `read` until `done` accepts the value.
    ///
    /// Returns the accepted value, or [`Error::Timeout`] carrying the last value read.
    pub fn wait<R, D>(&self, what: &'static str, mut read: R, done: D) -> Result<u32>
    where
        R: FnMut() -> u32,
        D: Fn(u32) -> bool,
    {
        let mut last = 0;
        for i in 0..self.iterations {
            last = read();
            log::trace!("{}: poll {} value {:#010x}", what, i, last);
            if done(last) {
                return Ok(last);
            }
            if self.interval_us > 0 {
                thread::sleep(Duration::from_micros(self.interval_us));
            }
        }

        log::error!(
            "{}: not reached after {} polls, last value {:#010x}",
            what,
            self.iterations,
            last
        );
        Err(Error::Timeout {
            what,
            iterations: self.iterations,
            last,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_returns_first_accepted_value() {
        let mut n = 0;
        let value = PollBound::new(10, 0)
            .wait(
                "counter",
                || {
                    n += 1;
                    n
                },
                |v| v == 3,
            )
            .unwrap();
        assert_eq!(value, 3);
        assert_eq!(n, 3);
    }

    #[test]
    fn test_wait_is_bounded() {
        let mut reads = 0;
        let err = PollBound::new(5, 0)
            .wait(
                "never",
                || {
                    reads += 1;
                    0xabcd
                },
                |_| false,
            )
            .unwrap_err();
        assert_eq!(reads, 5);
        match err {
            Error::Timeout { what, iterations, last } => {
                assert_eq!(what, "never");
                assert_eq!(iterations, 5);
                assert_eq!(last, 0xabcd);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_budget() {
        assert_eq!(PollBound::new(2000, 500).budget(), Duration::from_secs(1));
    }
}
