//! Internal consistency checks.
use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

use super::info::Id;
use super::state::State;
use super::MAX_NEW_REFS;

/// A broken invariant of the address manager state.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inconsistency {
    /// Random index size doesn't match the table counts.
    #[error("random index size doesn't match the number of addresses")]
    RandomSize,
    /// A "tried" record has never succeeded.
    #[error("tried address was never connected to")]
    TriedWithoutSuccess,
    /// A "tried" record is referenced from the "new" table.
    #[error("tried address has new table references")]
    TriedWithReferences,
    /// A "new" record has too many references.
    #[error("new address has too many references")]
    TooManyReferences,
    /// A "new" record has no references.
    #[error("new address is unreferenced")]
    Unreferenced,
    /// The address index doesn't match the records.
    #[error("address index doesn't match the records")]
    IndexMismatch,
    /// A record's random position is wrong.
    #[error("random position doesn't match the random index")]
    RandomPosition,
    /// The "tried" count is wrong.
    #[error("tried address count mismatch")]
    TriedCount,
    /// The "new" count is wrong.
    #[error("new address count mismatch")]
    NewCount,
    /// A "tried" slot holds an unknown record.
    #[error("tried table slot holds an unknown address")]
    TriedUnknown,
    /// A "tried" record is in the wrong bucket.
    #[error("tried address is in the wrong bucket")]
    TriedBucket,
    /// A "tried" record is at the wrong position.
    #[error("tried address is at the wrong position")]
    TriedPosition,
    /// A "new" slot holds an unknown record.
    #[error("new table slot holds an unknown address")]
    NewUnknown,
    /// A "new" record is at the wrong position.
    #[error("new address is at the wrong position")]
    NewPosition,
    /// A "tried" record isn't in the "tried" table.
    #[error("tried address is missing from the tried table")]
    TriedMissing,
    /// A "new" record is referenced less than its reference count says.
    #[error("new address is missing from the new table")]
    NewMissing,
    /// The bucketing key is all zeroes.
    #[error("bucketing key is null")]
    NullKey,
}

impl Inconsistency {
    /// Numeric code of the failure. Always negative.
    pub fn code(&self) -> i32 {
        match self {
            Self::TriedWithoutSuccess => -1,
            Self::TriedWithReferences => -2,
            Self::TooManyReferences => -3,
            Self::Unreferenced => -4,
            Self::IndexMismatch => -5,
            Self::RandomSize => -7,
            Self::TriedCount => -9,
            Self::NewCount => -10,
            Self::TriedUnknown => -11,
            Self::NewUnknown => -12,
            Self::TriedMissing => -13,
            Self::RandomPosition => -14,
            Self::NewMissing => -15,
            Self::NullKey => -16,
            Self::TriedBucket => -17,
            Self::TriedPosition => -18,
            Self::NewPosition => -19,
        }
    }
}

impl State {
    /// Verify every structural invariant of the state.
    pub fn check(&self) -> Result<(), Inconsistency> {
        use Inconsistency::*;

        if self.random.len() != self.n_tried + self.n_new {
            return Err(RandomSize);
        }
        let mut tried = BTreeSet::<Id>::new();
        let mut refs = BTreeMap::<Id, usize>::new();

        for (id, info) in &self.records {
            if info.in_tried {
                if info.last_success.is_epoch() {
                    return Err(TriedWithoutSuccess);
                }
                if info.ref_count != 0 {
                    return Err(TriedWithReferences);
                }
                tried.insert(*id);
            } else {
                if info.ref_count > MAX_NEW_REFS {
                    return Err(TooManyReferences);
                }
                if info.ref_count == 0 {
                    return Err(Unreferenced);
                }
                refs.insert(*id, info.ref_count);
            }
            if self.index.get(&info.addr.addr) != Some(id) {
                return Err(IndexMismatch);
            }
            if self.random.get(info.random_pos) != Some(id) {
                return Err(RandomPosition);
            }
        }
        if self.index.len() != self.records.len() {
            return Err(IndexMismatch);
        }
        if tried.len() != self.n_tried {
            return Err(TriedCount);
        }
        if refs.len() != self.n_new {
            return Err(NewCount);
        }

        for (bucket, pos, id) in self.tried.iter() {
            let info = match self.records.get(&id) {
                Some(info) if tried.remove(&id) => info,
                _ => return Err(TriedUnknown),
            };
            if self.key.tried_bucket(&info.addr, self.asmap()) != bucket {
                return Err(TriedBucket);
            }
            if self.key.position(false, bucket, &info.addr) != pos {
                return Err(TriedPosition);
            }
        }

        for (bucket, pos, id) in self.new.iter() {
            let (info, count) = match (self.records.get(&id), refs.get_mut(&id)) {
                (Some(info), Some(count)) => (info, count),
                _ => return Err(NewUnknown),
            };
            if self.key.position(true, bucket, &info.addr) != pos {
                return Err(NewPosition);
            }
            *count -= 1;
            if *count == 0 {
                refs.remove(&id);
            }
        }

        if !tried.is_empty() {
            return Err(TriedMissing);
        }
        if !refs.is_empty() {
            return Err(NewMissing);
        }
        if self.key.is_null() {
            return Err(NullKey);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use addrman_common::address::Address;
    use addrman_common::bitcoin::network::constants::ServiceFlags;
    use addrman_common::time::{LocalDuration, LocalTime};

    const NOW: LocalTime = LocalTime::from_secs(1_700_000_000);

    fn fixture() -> State {
        let mut state = State::new(fastrand::Rng::with_seed(1), None, true);
        let source = [250, 9, 9, 9].into();

        for i in 1..=20 {
            let addr = Address::new(
                ([250, i, 1, 1], 8333).into(),
                ServiceFlags::NETWORK,
                NOW - LocalDuration::from_hours(1),
            );
            state.add([addr], &source, LocalDuration::ZERO, NOW);
        }
        state.good(&([250, 1, 1, 1], 8333).into(), false, NOW);
        state
    }

    #[test]
    fn test_consistent() {
        let state = fixture();

        assert_eq!(state.n_tried, 1);
        assert_eq!(state.check(), Ok(()));
    }

    #[test]
    fn test_codes() {
        let mut state = fixture();
        state.n_new += 1;
        assert_eq!(state.check().unwrap_err().code(), -7);

        let mut state = fixture();
        state.n_new += 1;
        state.n_tried -= 1;
        assert_eq!(state.check().unwrap_err().code(), -9);

        let mut state = State::new(fastrand::Rng::with_seed(1), None, false);
        state.key = Default::default();
        assert_eq!(state.check(), Err(Inconsistency::NullKey));

        let mut state = fixture();
        let id = state.find(&([250, 1, 1, 1], 8333).into()).unwrap();
        state.records.get_mut(&id).unwrap().last_success = LocalTime::EPOCH;
        assert_eq!(state.check(), Err(Inconsistency::TriedWithoutSuccess));

        let mut state = fixture();
        let info = state.records.values_mut().find(|i| !i.in_tried).unwrap();
        info.ref_count += 1;
        assert_eq!(state.check(), Err(Inconsistency::NewMissing));

        let mut state = fixture();
        state.random.swap(0, 1);
        assert_eq!(state.check().unwrap_err().code(), -14);

        let mut state = fixture();
        let (bucket, pos, _) = state.tried.iter().next().unwrap();
        state.tried.set(bucket, pos, 999);
        assert_eq!(state.check(), Err(Inconsistency::TriedUnknown));
    }
}
