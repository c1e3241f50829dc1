//! Address records.
use std::net;

use addrman_common::address::Address;
use addrman_common::time::{LocalDuration, LocalTime};

use super::{HORIZON, MAX_FAILURES, MIN_FAIL, RETRIES, TRY_GRACE};

/// Record identifier. Identifiers are never reused.
pub type Id = u64;

/// Maximum number of failed attempts that lower an address's chance of being
/// selected.
const MAX_CHANCE_ATTEMPTS: u32 = 8;
/// Selection weight penalty per failed attempt.
const ATTEMPT_PENALTY: f64 = 0.66;
/// Selection weight penalty for addresses tried very recently.
const RECENT_TRY_PENALTY: f64 = 0.01;
/// What counts as a very recent attempt.
const RECENT_TRY: LocalDuration = LocalDuration::from_mins(10);
/// How far into the future an address's timestamp may be.
const MAX_FUTURE: LocalDuration = LocalDuration::from_mins(10);

/// Everything we know about an address.
#[derive(Debug, Clone, PartialEq)]
pub struct AddrInfo {
    /// The address itself, with its services and last-seen time.
    pub addr: Address,
    /// The address we learned about this address from.
    pub source: net::IpAddr,
    /// Last successful connection. The Epoch if never.
    pub last_success: LocalTime,
    /// Last connection attempt. The Epoch if never.
    pub last_try: LocalTime,
    /// Last counted connection attempt.
    pub last_count_attempt: LocalTime,
    /// Connection attempts since the last success.
    pub attempts: u32,
    /// Number of "new" table slots referencing this record.
    pub ref_count: usize,
    /// Whether the record is in the "tried" table.
    pub in_tried: bool,
    /// Position in the random-order index.
    pub random_pos: usize,
}

impl AddrInfo {
    /// Create a fresh record.
    pub fn new(addr: Address, source: net::IpAddr) -> Self {
        Self {
            addr,
            source,
            last_success: LocalTime::EPOCH,
            last_try: LocalTime::EPOCH,
            last_count_attempt: LocalTime::EPOCH,
            attempts: 0,
            ref_count: 0,
            in_tried: false,
            random_pos: 0,
        }
    }

    /// Whether the address is so stale or unreliable that it should be evicted
    /// rather than kept, and never handed out.
    pub fn is_terrible(&self, now: LocalTime) -> bool {
        // Never judge an address that was tried in the last minute.
        if now - self.last_try <= TRY_GRACE {
            return false;
        }
        if self.addr.time > now + MAX_FUTURE {
            return true;
        }
        if now - self.addr.time > HORIZON {
            return true;
        }
        if self.last_success.is_epoch() && self.attempts >= RETRIES {
            return true;
        }
        if now - self.last_success > MIN_FAIL && self.attempts >= MAX_FAILURES {
            return true;
        }
        false
    }

    /// Relative chance of this address being selected.
    pub fn chance(&self, now: LocalTime) -> f64 {
        let mut chance = 1.0;

        if now - self.last_try < RECENT_TRY {
            chance *= RECENT_TRY_PENALTY;
        }
        chance * ATTEMPT_PENALTY.powi(self.attempts.min(MAX_CHANCE_ATTEMPTS) as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use addrman_common::bitcoin::network::constants::ServiceFlags;

    const NOW: LocalTime = LocalTime::from_secs(1_700_000_000);

    fn info() -> AddrInfo {
        let addr = Address::new(([250, 1, 1, 1], 8333).into(), ServiceFlags::NONE, NOW);
        AddrInfo::new(addr, [250, 2, 1, 1].into())
    }

    #[test]
    fn test_terrible() {
        let mut info = info();
        assert!(!info.is_terrible(NOW));

        // From the future.
        info.addr.time = NOW + LocalDuration::from_mins(11);
        assert!(info.is_terrible(NOW));

        // Not seen in a month.
        info.addr.time = NOW - LocalDuration::from_days(31);
        assert!(info.is_terrible(NOW));

        // Never succeeded, tried three times.
        info.addr.time = NOW;
        info.attempts = 3;
        assert!(info.is_terrible(NOW));

        // Succeeded a while ago, failed ten times since.
        info.last_success = NOW - LocalDuration::from_days(8);
        assert!(!info.is_terrible(NOW));
        info.attempts = 10;
        assert!(info.is_terrible(NOW));

        // Tried in the last minute.
        info.last_try = NOW - LocalDuration::from_secs(59);
        assert!(!info.is_terrible(NOW));
        info.addr.time = NOW - LocalDuration::from_days(60);
        assert!(!info.is_terrible(NOW));
    }

    #[test]
    fn test_chance() {
        let mut info = info();
        assert_eq!(info.chance(NOW), 1.0);

        info.last_try = NOW - LocalDuration::from_mins(5);
        assert!((info.chance(NOW) - 0.01).abs() < f64::EPSILON);

        info.last_try = NOW - LocalDuration::from_hours(1);
        info.attempts = 1;
        assert!((info.chance(NOW) - 0.66).abs() < f64::EPSILON);

        // Attempts beyond the cap don't lower the chance further.
        info.attempts = 8;
        let floor = info.chance(NOW);
        info.attempts = 100;
        assert_eq!(info.chance(NOW), floor);
        assert!(floor > 1. / 28.);
    }
}
