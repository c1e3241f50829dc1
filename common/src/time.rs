//! Local time, durations and clocks.
use std::sync::atomic;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

/// Seconds since Epoch, as used in `addr` messages and on disk.
pub type BlockTime = u32;

/// Local time.
///
/// The default value is the Epoch, which is also used to mean "never".
#[derive(Debug, PartialEq, Eq, Clone, Copy, Ord, PartialOrd, Default, Hash)]
pub struct LocalTime {
    /// Milliseconds since Epoch.
    millis: u128,
}

impl std::fmt::Display for LocalTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_secs())
    }
}

impl LocalTime {
    /// The Epoch. Stands for "never" in timestamps that may be unset.
    pub const EPOCH: LocalTime = LocalTime { millis: 0 };

    /// Construct a local time from the current system time.
    ///
    /// This clock is monotonic.
    pub fn now() -> Self {
        static LAST: atomic::AtomicU64 = atomic::AtomicU64::new(0);

        let now = Self::from(SystemTime::now()).as_secs();
        let last = LAST.load(atomic::Ordering::SeqCst);

        // If the current time is in the past, return the last recorded time instead.
        if now < last {
            Self::from_secs(last)
        } else {
            LAST.store(now, atomic::Ordering::SeqCst);
            LocalTime::from_secs(now)
        }
    }

    /// Construct a local time from whole seconds since Epoch.
    pub const fn from_secs(secs: u64) -> Self {
        Self {
            millis: secs as u128 * 1000,
        }
    }

    /// Construct a local time from a block time.
    pub const fn from_block_time(t: BlockTime) -> Self {
        Self::from_secs(t as u64)
    }

    /// Return whole seconds since Epoch.
    pub const fn as_secs(&self) -> u64 {
        (self.millis / 1000) as u64
    }

    /// Return the time as a block time, saturating at `u32::MAX`.
    pub fn block_time(&self) -> BlockTime {
        self.as_secs().min(BlockTime::MAX as u64) as BlockTime
    }

    /// Whether this is the Epoch, ie. an unset timestamp.
    pub fn is_epoch(&self) -> bool {
        self.millis == 0
    }

    /// Subtract a duration, stopping at the Epoch.
    pub fn saturating_sub(self, duration: LocalDuration) -> LocalTime {
        LocalTime {
            millis: self.millis.saturating_sub(duration.0),
        }
    }

    /// Get the difference between two times.
    pub fn diff(&self, other: LocalTime) -> LocalDuration {
        if self > &other {
            *self - other
        } else {
            other - *self
        }
    }

    /// Elapse time.
    ///
    /// Adds the given duration to the time.
    pub fn elapse(&mut self, duration: LocalDuration) {
        self.millis += duration.as_millis()
    }
}

/// Convert a `SystemTime` into a local time.
impl From<SystemTime> for LocalTime {
    fn from(system: SystemTime) -> Self {
        let millis = system
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();

        Self { millis }
    }
}

/// Substract two local times. Yields a duration, which is zero if `other` is later.
impl std::ops::Sub<LocalTime> for LocalTime {
    type Output = LocalDuration;

    fn sub(self, other: LocalTime) -> LocalDuration {
        LocalDuration(self.millis.saturating_sub(other.millis))
    }
}

/// Substract a duration from a local time. Yields a local time.
impl std::ops::Sub<LocalDuration> for LocalTime {
    type Output = LocalTime;

    fn sub(self, other: LocalDuration) -> LocalTime {
        LocalTime {
            millis: self.millis - other.0,
        }
    }
}

/// Add a duration to a local time. Yields a local time.
impl std::ops::Add<LocalDuration> for LocalTime {
    type Output = LocalTime;

    fn add(self, other: LocalDuration) -> LocalTime {
        LocalTime {
            millis: self.millis + other.0,
        }
    }
}

/// Time duration as measured locally.
#[derive(Debug, Copy, Clone, PartialOrd, Ord, PartialEq, Eq, Default)]
pub struct LocalDuration(u128);

impl LocalDuration {
    /// Zero duration.
    pub const ZERO: LocalDuration = LocalDuration(0);

    /// Create a new duration from whole seconds.
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs as u128 * 1000)
    }

    /// Create a new duration from whole minutes.
    pub const fn from_mins(mins: u64) -> Self {
        Self::from_secs(mins * 60)
    }

    /// Create a new duration from whole hours.
    pub const fn from_hours(hours: u64) -> Self {
        Self::from_mins(hours * 60)
    }

    /// Create a new duration from whole days.
    pub const fn from_days(days: u64) -> Self {
        Self::from_hours(days * 24)
    }

    /// Construct a new duration from milliseconds.
    pub const fn from_millis(millis: u128) -> Self {
        Self(millis)
    }

    /// Return the number of minutes in this duration.
    pub const fn as_mins(&self) -> u64 {
        self.as_secs() / 60
    }

    /// Return the number of seconds in this duration.
    pub const fn as_secs(&self) -> u64 {
        (self.0 / 1000) as u64
    }

    /// Return the number of milliseconds in this duration.
    pub const fn as_millis(&self) -> u128 {
        self.0
    }
}

impl std::fmt::Display for LocalDuration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.as_millis() < 1000 {
            write!(f, "{} millisecond(s)", self.as_millis())
        } else if self.as_secs() < 60 {
            let fraction = self.as_millis() % 1000;
            if fraction > 0 {
                write!(f, "{}.{} second(s)", self.as_secs(), fraction)
            } else {
                write!(f, "{} second(s)", self.as_secs())
            }
        } else if self.as_mins() < 60 {
            let fraction = self.as_secs() % 60;
            if fraction > 0 {
                write!(
                    f,
                    "{:.2} minutes(s)",
                    self.as_mins() as f64 + (fraction as f64 / 60.)
                )
            } else {
                write!(f, "{} minutes(s)", self.as_mins())
            }
        } else {
            let fraction = self.as_mins() % 60;
            if fraction > 0 {
                write!(f, "{:.2} hour(s)", self.as_mins() as f64 / 60.)
            } else {
                write!(f, "{} hour(s)", self.as_mins() / 60)
            }
        }
    }
}

impl std::ops::Add<LocalDuration> for LocalDuration {
    type Output = LocalDuration;

    fn add(self, other: LocalDuration) -> LocalDuration {
        LocalDuration(self.0 + other.0)
    }
}

impl std::ops::Mul<u64> for LocalDuration {
    type Output = LocalDuration;

    fn mul(self, other: u64) -> LocalDuration {
        LocalDuration(self.0 * other as u128)
    }
}

impl From<LocalDuration> for std::time::Duration {
    fn from(other: LocalDuration) -> Self {
        std::time::Duration::from_millis(other.0 as u64)
    }
}

/// Clock that tells the time.
///
/// The address manager asks its clock for the current network-adjusted time.
pub trait Clock: Clone {
    /// Tell the time in local time.
    fn local_time(&self) -> LocalTime;

    /// Return the local time as seconds since Epoch.
    fn block_time(&self) -> BlockTime {
        self.local_time().block_time()
    }
}

/// A fixed point in time is a clock that never moves.
impl Clock for LocalTime {
    fn local_time(&self) -> LocalTime {
        *self
    }
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn local_time(&self) -> LocalTime {
        LocalTime::now()
    }
}

/// Clock with interior mutability, that can be shared across threads.
#[derive(Debug, Clone)]
pub struct RefClock {
    inner: Arc<Mutex<LocalTime>>,
}

impl RefClock {
    /// Elapse time.
    pub fn elapse(&self, duration: LocalDuration) {
        self.inner.lock().elapse(duration)
    }

    /// Set the time.
    pub fn set(&self, time: LocalTime) {
        *self.inner.lock() = time;
    }
}

impl From<LocalTime> for RefClock {
    fn from(time: LocalTime) -> Self {
        Self {
            inner: Arc::new(Mutex::new(time)),
        }
    }
}

impl Clock for RefClock {
    fn local_time(&self) -> LocalTime {
        *self.inner.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_duration_display() {
        assert_eq!(LocalDuration::from_mins(90).to_string(), "1.50 hour(s)");
        assert_eq!(LocalDuration::from_mins(60).to_string(), "1 hour(s)");
        assert_eq!(
            LocalDuration::from_millis(1280).to_string(),
            "1.280 second(s)"
        );
        assert_eq!(
            LocalDuration::from_millis(980).to_string(),
            "980 millisecond(s)"
        );
    }

    #[test]
    fn test_saturating_arithmetic() {
        let t = LocalTime::from_secs(30);

        assert_eq!(t.saturating_sub(LocalDuration::from_mins(1)), LocalTime::EPOCH);
        assert_eq!(LocalTime::EPOCH - t, LocalDuration::ZERO);
        assert_eq!(t - LocalTime::EPOCH, LocalDuration::from_secs(30));
        assert_eq!(t.diff(LocalTime::from_secs(90)), LocalDuration::from_mins(1));
    }

    #[test]
    fn test_ref_clock() {
        let clock = RefClock::from(LocalTime::from_secs(1000));
        let other = clock.clone();

        other.elapse(LocalDuration::from_secs(10));
        assert_eq!(clock.local_time(), LocalTime::from_secs(1010));
        assert_eq!(clock.block_time(), 1010);
    }
}
