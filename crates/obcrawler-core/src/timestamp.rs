use serde::{Deserialize, Serialize};
use std::ops::{Add, Sub};
use std::time::{Duration, SystemTime};

/// Unix timestamp in seconds since epoch.
///
/// All wall-clock fields on [`crate::models::Peer`] and every comparison made
/// by the control loops (stale-peer scan, unpin scan) go through this type so
/// that arithmetic like `now - Duration::from_secs(7 * 86400)` saturates
/// instead of underflowing.
#[derive(Clone, Copy, Eq, PartialEq, PartialOrd, Ord, Debug, Serialize, Deserialize, Default, Hash)]
pub struct Timestamp(i64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    /// Current timestamp.
    pub fn now() -> Self {
        let secs = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .expect("now() is never before UNIX_EPOCH")
            .as_secs();
        Self(secs as i64)
    }

    pub fn from_secs(secs: i64) -> Self {
        Self(secs)
    }

    pub fn as_secs(&self) -> i64 {
        self.0
    }
}

impl Sub<Duration> for Timestamp {
    type Output = Self;

    fn sub(self, rhs: Duration) -> Self {
        Self(self.0.saturating_sub(rhs.as_secs() as i64))
    }
}

impl Add<Duration> for Timestamp {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self {
        Self(self.0.saturating_add(rhs.as_secs() as i64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_and_arithmetic() {
        let a = Timestamp::from_secs(10);
        let b = Timestamp::from_secs(20);
        assert!(a < b);
        assert_eq!(a + Duration::from_secs(10), b);
        assert_eq!(b - Duration::from_secs(10), a);
    }

    #[test]
    fn subtraction_does_not_panic_below_zero() {
        let a = Timestamp::from_secs(5);
        assert_eq!(a - Duration::from_secs(100), Timestamp::from_secs(-95));
    }
}
