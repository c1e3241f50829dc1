//! Collections keyed with `fastrand`-generated random state.
//!
//! Index maps that are keyed by data received from the network use these, so that
//! remote peers can't predict hash collisions.
use bitcoin::hashes::siphash24::Hash;

/// A `HashMap` which uses `fastrand::Rng` for its random state.
pub type HashMap<K, V> = std::collections::HashMap<K, V, RandomState>;

/// A `HashSet` which uses `fastrand::Rng` for its random state.
pub type HashSet<K> = std::collections::HashSet<K, RandomState>;

/// Hasher using `siphash24`.
#[derive(Default)]
pub struct Hasher {
    data: Vec<u8>,
    key1: u64,
    key2: u64,
}

impl std::hash::Hasher for Hasher {
    fn write(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes)
    }

    fn finish(&self) -> u64 {
        Hash::hash_with_keys(self.key1, self.key2, &self.data).as_u64()
    }
}

/// Random hasher state.
#[derive(Default, Clone, Debug)]
pub struct RandomState {
    key1: u64,
    key2: u64,
}

impl std::hash::BuildHasher for RandomState {
    type Hasher = Hasher;

    fn build_hasher(&self) -> Self::Hasher {
        Hasher {
            data: Vec::new(),
            key1: self.key1,
            key2: self.key2,
        }
    }
}

impl From<&fastrand::Rng> for RandomState {
    fn from(rng: &fastrand::Rng) -> Self {
        Self {
            key1: rng.u64(..),
            key2: rng.u64(..),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_maps_agree() {
        let mut a: HashMap<u32, &str> = HashMap::with_hasher((&fastrand::Rng::with_seed(7)).into());
        let mut b: HashMap<u32, &str> = HashMap::with_hasher((&fastrand::Rng::with_seed(7)).into());

        for (i, v) in ["a", "b", "c", "d"].iter().enumerate() {
            a.insert(i as u32, v);
            b.insert(i as u32, v);
        }
        assert_eq!(
            a.keys().collect::<Vec<_>>(),
            b.keys().collect::<Vec<_>>(),
            "same seed yields the same iteration order"
        );
        assert_eq!(a.get(&2), Some(&"c"));
    }
}
