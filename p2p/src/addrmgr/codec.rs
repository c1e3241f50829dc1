//! On-disk encoding of the address manager.
//!
//! The layout is:
//!
//! ```text
//! format              u8
//! compat              u8     32 + lowest compatible format
//! key                 [u8; 32]
//! new count           i32
//! tried count         i32
//! new bucket count    i32    xor 2^30
//! new records         [record; new count]
//! tried records       [record; tried count]
//! new buckets         [(i32, [i32; n]); new bucket count]
//! asmap checksum      [u8; 32]
//! ```
//!
//! Bucket entries of the "new" table are stored as indices into the list of new
//! records. Tried records are re-bucketed on load, and so are new records when the
//! bucket count or AS map changed.
use std::collections::BTreeMap;
use std::io;
use std::net;
use std::sync::Arc;

use addrman_common::address::Address;
use addrman_common::asmap::Asmap;
use addrman_common::bitcoin::consensus::{encode, Decodable, Encodable};
use addrman_common::bitcoin::network::constants::ServiceFlags;
use addrman_common::network;
use addrman_common::time::LocalTime;

use super::bucket::Key;
use super::info::{AddrInfo, Id};
use super::state::State;
use super::{BUCKET_SIZE, MAX_NEW_REFS, NEW_BUCKET_COUNT, TRIED_BUCKET_COUNT};
use crate::error::Error;

/// Format written by this version.
pub const FORMAT: u8 = 2;
/// Lowest format able to read what we write.
pub const LOWEST_COMPATIBLE: u8 = 2;
/// Offset of the lowest compatible format in the compat byte.
pub const INCOMPATIBILITY_BASE: u8 = 32;
/// Mask applied to the stored bucket count.
const BUCKET_COUNT_XOR: i32 = 1 << 30;

impl Encodable for AddrInfo {
    fn consensus_encode<W: io::Write + ?Sized>(&self, e: &mut W) -> Result<usize, io::Error> {
        let mut len = 0;

        len += self.addr.time.block_time().consensus_encode(e)?;
        len += self.addr.services.to_u64().consensus_encode(e)?;
        len += network::ip_bytes(&self.addr.ip()).consensus_encode(e)?;
        len += self.addr.port().to_be_bytes().consensus_encode(e)?;
        len += network::ip_bytes(&self.source).consensus_encode(e)?;
        len += (self.last_success.as_secs() as i64).consensus_encode(e)?;
        len += (self.attempts.min(i32::MAX as u32) as i32).consensus_encode(e)?;

        Ok(len)
    }
}

impl Decodable for AddrInfo {
    fn consensus_decode<D: io::Read + ?Sized>(d: &mut D) -> Result<Self, encode::Error> {
        let time = u32::consensus_decode(d)?;
        let services = u64::consensus_decode(d)?;
        let ip = <[u8; 16]>::consensus_decode(d)?;
        let port = <[u8; 2]>::consensus_decode(d)?;
        let source = <[u8; 16]>::consensus_decode(d)?;
        let last_success = i64::consensus_decode(d)?;
        let attempts = i32::consensus_decode(d)?;

        if last_success < 0 {
            return Err(encode::Error::ParseFailed("negative last success time"));
        }
        let addr = Address::new(
            net::SocketAddr::new(network::ip_from_bytes(ip), u16::from_be_bytes(port)),
            ServiceFlags::from(services),
            LocalTime::from_block_time(time),
        );
        let mut info = AddrInfo::new(addr, network::ip_from_bytes(source));

        info.last_success = LocalTime::from_secs(last_success as u64);
        info.attempts = attempts.max(0) as u32;

        Ok(info)
    }
}

impl State {
    /// Write the state out in the on-disk format.
    pub fn encode<W: io::Write + ?Sized>(&self, e: &mut W) -> Result<usize, io::Error> {
        let mut len = 0;

        len += FORMAT.consensus_encode(e)?;
        len += (INCOMPATIBILITY_BASE + LOWEST_COMPATIBLE).consensus_encode(e)?;
        len += self.key.as_bytes().consensus_encode(e)?;
        len += (self.n_new as i32).consensus_encode(e)?;
        len += (self.n_tried as i32).consensus_encode(e)?;
        len += (NEW_BUCKET_COUNT as i32 ^ BUCKET_COUNT_XOR).consensus_encode(e)?;

        // Position of each new record in the stream.
        let mut indices = BTreeMap::<Id, i32>::new();

        for (id, info) in self.records.iter().filter(|(_, i)| i.ref_count > 0) {
            indices.insert(*id, indices.len() as i32);
            len += info.consensus_encode(e)?;
        }
        for info in self.records.values().filter(|i| i.in_tried) {
            len += info.consensus_encode(e)?;
        }
        for bucket in 0..self.new.buckets() {
            let entries = self
                .new
                .bucket(bucket)
                .filter_map(|id| indices.get(&id).copied())
                .collect::<Vec<_>>();

            len += (entries.len() as i32).consensus_encode(e)?;
            for ix in entries {
                len += ix.consensus_encode(e)?;
            }
        }
        len += checksum(self.asmap()).consensus_encode(e)?;

        Ok(len)
    }

    /// Read a state in the on-disk format.
    ///
    /// The result is checked for consistency before it is returned.
    pub fn decode<R: io::Read + ?Sized>(
        d: &mut R,
        rng: fastrand::Rng,
        asmap: Option<Arc<Asmap>>,
        deterministic: bool,
    ) -> Result<Self, Error> {
        let format = u8::consensus_decode(d)?;
        let compat = u8::consensus_decode(d)?;

        if compat < INCOMPATIBILITY_BASE {
            return Err(Error::Corrupt(format!(
                "compat value {} is lower than the expected minimum {}",
                compat, INCOMPATIBILITY_BASE
            )));
        }
        let lowest_compatible = compat - INCOMPATIBILITY_BASE;
        if lowest_compatible > FORMAT {
            return Err(Error::UnsupportedFormat {
                format,
                lowest_compatible,
                supported: FORMAT,
            });
        }

        let key = Key::from(<[u8; 32]>::consensus_decode(d)?);
        let n_new = i32::consensus_decode(d)?;
        let n_tried = i32::consensus_decode(d)?;
        let mut n_buckets = i32::consensus_decode(d)?;

        if format >= 1 {
            n_buckets ^= BUCKET_COUNT_XOR;
        }
        if n_new < 0 || n_new as usize > NEW_BUCKET_COUNT * BUCKET_SIZE {
            return Err(Error::Corrupt(format!(
                "new table size {} is out of range [0, {}]",
                n_new,
                NEW_BUCKET_COUNT * BUCKET_SIZE
            )));
        }
        if n_tried < 0 || n_tried as usize > TRIED_BUCKET_COUNT * BUCKET_SIZE {
            return Err(Error::Corrupt(format!(
                "tried table size {} is out of range [0, {}]",
                n_tried,
                TRIED_BUCKET_COUNT * BUCKET_SIZE
            )));
        }

        let mut state = State::new(rng, asmap, deterministic);
        state.key = key;

        for _ in 0..n_new {
            let info = AddrInfo::consensus_decode(d)?;
            let id = state.create(info.addr, info.source);

            if let Some(record) = state.records.get_mut(&id) {
                record.last_success = info.last_success;
                record.attempts = info.attempts;
            }
            state.n_new += 1;
        }

        let mut lost_tried = 0;
        for _ in 0..n_tried {
            let info = AddrInfo::consensus_decode(d)?;
            let (bucket, pos) = state.tried_slot(&info.addr);

            if state.tried.get(bucket, pos).is_some() {
                lost_tried += 1;
                continue;
            }
            let id = state.create(info.addr, info.source);

            if let Some(record) = state.records.get_mut(&id) {
                record.last_success = info.last_success;
                record.attempts = info.attempts;
                record.in_tried = true;
            }
            state.tried.set(bucket, pos, id);
            state.n_tried += 1;
        }

        let mut entries = Vec::new();
        for bucket in 0..n_buckets.max(0) as usize {
            let count = i32::consensus_decode(d)?;

            for _ in 0..count.max(0) {
                let ix = i32::consensus_decode(d)?;

                if ix >= 0 && ix < n_new {
                    entries.push((bucket, ix as Id));
                }
            }
        }

        let stored = if format >= 2 {
            <[u8; 32]>::consensus_decode(d)?
        } else {
            [0; 32]
        };
        // Only keep the stored bucketing if it was computed the same way.
        let restore = n_buckets == NEW_BUCKET_COUNT as i32 && stored == checksum(state.asmap());
        if !restore {
            log::debug!(
                target: "addrman",
                "Bucketing method was updated, re-bucketing addresses"
            );
        }

        for (bucket, id) in entries {
            let (addr, source, refs) = match state.records.get(&id) {
                Some(info) => (info.addr, info.source, info.ref_count),
                None => continue,
            };
            if refs >= MAX_NEW_REFS {
                continue;
            }
            let restored = if restore {
                let pos = state.key.position(true, bucket, &addr);
                state.new.get(bucket, pos).is_none().then_some((bucket, pos))
            } else {
                None
            };
            let (bucket, pos) = restored.unwrap_or_else(|| state.new_slot(&addr, &source));
            if state.new.get(bucket, pos).is_none() {
                state.new.set(bucket, pos, id);

                if let Some(info) = state.records.get_mut(&id) {
                    info.ref_count += 1;
                }
            }
        }

        let unreferenced = state
            .records
            .iter()
            .filter(|(_, info)| !info.in_tried && info.ref_count == 0)
            .map(|(id, _)| *id)
            .collect::<Vec<_>>();

        for id in unreferenced.iter() {
            state.delete(*id);
        }
        if lost_tried + unreferenced.len() > 0 {
            log::debug!(
                target: "addrman",
                "Lost {} new and {} tried addresses due to collisions or invalid addresses",
                unreferenced.len(),
                lost_tried
            );
        }
        state.check().map_err(Error::Inconsistent)?;

        log::debug!(
            target: "addrman",
            "Loaded {} addresses: {} new, {} tried",
            state.len(),
            state.n_new,
            state.n_tried
        );
        Ok(state)
    }
}

/// Checksum of the AS map, or zeroes if there is none.
fn checksum(asmap: Option<&Asmap>) -> [u8; 32] {
    asmap.map(|a| a.checksum()).unwrap_or([0; 32])
}
