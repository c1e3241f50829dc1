//! Keyed bucket placement.
//!
//! Where an address lands in either table is entirely determined by the secret
//! key, the address, its group and, for the "new" table, the group of its source.
//! Placement is never stored; it is recomputed whenever it's needed.
use std::net;

use addrman_common::address::Address;
use addrman_common::asmap::Asmap;
use addrman_common::bitcoin::consensus::encode::serialize;
use addrman_common::bitcoin::hashes::{sha256d, Hash};
use addrman_common::network;

use super::{
    BUCKET_SIZE, NEW_BUCKETS_PER_SOURCE_GROUP, NEW_BUCKET_COUNT, TRIED_BUCKETS_PER_GROUP,
    TRIED_BUCKET_COUNT,
};

/// Table tag of the "new" table.
const NEW_TAG: u8 = b'N';
/// Table tag of the "tried" table.
const TRIED_TAG: u8 = b'K';

/// Secret key used for bucket placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Key([u8; 32]);

impl Key {
    /// Generate a random key.
    pub fn random(rng: &fastrand::Rng) -> Self {
        let mut key = [0; 32];

        for chunk in key.chunks_mut(8) {
            chunk.copy_from_slice(&rng.u64(..).to_le_bytes());
        }
        Self(key)
    }

    /// The fixed key used in deterministic mode.
    pub fn deterministic() -> Self {
        let mut key = [0; 32];
        key[0] = 1;

        Self(key)
    }

    /// Whether the key is all zeroes.
    pub fn is_null(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// Key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Bucket of the "tried" table an address belongs to.
    pub fn tried_bucket(&self, addr: &Address, asmap: Option<&Asmap>) -> usize {
        let group = network::group(&addr.ip(), asmap);
        let h1 = self.hash(&serialize(&addr.key().to_vec()));

        let mut data = serialize(&group);
        data.extend_from_slice(&(h1 % TRIED_BUCKETS_PER_GROUP as u64).to_le_bytes());

        (self.hash(&data) % TRIED_BUCKET_COUNT as u64) as usize
    }

    /// Bucket of the "new" table an address belongs to, given the address it was
    /// learned from.
    pub fn new_bucket(&self, addr: &Address, source: &net::IpAddr, asmap: Option<&Asmap>) -> usize {
        let group = network::group(&addr.ip(), asmap);
        let source_group = serialize(&network::group(source, asmap));

        let mut data = serialize(&group);
        data.extend_from_slice(&source_group);
        let h1 = self.hash(&data);

        let mut data = source_group;
        data.extend_from_slice(&(h1 % NEW_BUCKETS_PER_SOURCE_GROUP as u64).to_le_bytes());

        (self.hash(&data) % NEW_BUCKET_COUNT as u64) as usize
    }

    /// Position of an address within a bucket.
    pub fn position(&self, new: bool, bucket: usize, addr: &Address) -> usize {
        let mut data = Vec::with_capacity(1 + 4 + 1 + 18);

        data.push(if new { NEW_TAG } else { TRIED_TAG });
        data.extend_from_slice(&(bucket as i32).to_le_bytes());
        data.extend_from_slice(&serialize(&addr.key().to_vec()));

        (self.hash(&data) % BUCKET_SIZE as u64) as usize
    }

    /// First eight bytes, little-endian, of the double-SHA256 of the key and data.
    fn hash(&self, data: &[u8]) -> u64 {
        let mut preimage = Vec::with_capacity(self.0.len() + data.len());
        preimage.extend_from_slice(&self.0);
        preimage.extend_from_slice(data);

        let digest = sha256d::Hash::hash(&preimage).into_inner();
        let mut bytes = [0; 8];
        bytes.copy_from_slice(&digest[..8]);

        u64::from_le_bytes(bytes)
    }
}

impl From<[u8; 32]> for Key {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}
