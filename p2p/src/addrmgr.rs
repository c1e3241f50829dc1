//!
//! The stochastic peer address manager.
//!
//! Addresses learned from the network are kept in two tables of fixed-size
//! buckets. The "new" table holds addresses we've heard about but never connected
//! to; the "tried" table holds addresses we've connected to successfully at least
//! once. Where an address may live in either table is decided by a keyed hash of
//! the address, its network group and, for the "new" table, the group of the peer
//! that told us about it. Since the key is secret, an attacker can't predict, and
//! therefore can't flood, the buckets an honest address competes for.
//!
//! Eviction is local to a bucket slot: a newcomer only displaces an occupant that
//! is terrible, or that is referenced more widely than itself.
//!
#![warn(missing_docs)]
use std::io;
use std::net;
use std::sync::Arc;

use parking_lot::Mutex;

use addrman_common::address::Address;
use addrman_common::asmap::Asmap;
use addrman_common::bitcoin::network::constants::ServiceFlags;
use addrman_common::network::{self, Network};
use addrman_common::time::{Clock, LocalDuration, LocalTime};

use crate::error::Error;

mod bucket;
mod check;
mod codec;
mod info;
mod state;
mod table;


pub use check::Inconsistency;
pub use codec::{FORMAT, INCOMPATIBILITY_BASE, LOWEST_COMPATIBLE};

use state::State;

/// Number of buckets of the "tried" table.
pub const TRIED_BUCKET_COUNT: usize = 256;
/// Number of buckets of the "new" table.
pub const NEW_BUCKET_COUNT: usize = 1024;
/// Number of slots in a bucket.
pub const BUCKET_SIZE: usize = 64;
/// Number of "tried" buckets the addresses of one group spread over.
pub const TRIED_BUCKETS_PER_GROUP: usize = 8;
/// Number of "new" buckets the addresses from one source group spread over.
pub const NEW_BUCKETS_PER_SOURCE_GROUP: usize = 64;
/// Maximum number of "new" table slots referencing one address.
pub const MAX_NEW_REFS: usize = 8;
/// Addresses not seen for this long are terrible.
pub const HORIZON: LocalDuration = LocalDuration::from_days(30);
/// Failed attempts, without any success, after which an address is terrible.
pub const RETRIES: u32 = 3;
/// Failed attempts within [`MIN_FAIL`] after which an address is terrible.
pub const MAX_FAILURES: u32 = 10;
/// See [`MAX_FAILURES`].
pub const MIN_FAIL: LocalDuration = LocalDuration::from_days(7);
/// An incumbent that connected or was tried within this window is not replaced
/// by a colliding address.
pub const REPLACEMENT: LocalDuration = LocalDuration::from_hours(4);
/// Maximum number of pending "tried" collisions.
pub const TRIED_COLLISION_SIZE: usize = 10;
/// Maximum time a collision may stay pending.
pub const TEST_WINDOW: LocalDuration = LocalDuration::from_mins(40);
/// Addresses tried within this window are never terrible.
pub const TRY_GRACE: LocalDuration = LocalDuration::from_secs(60);
/// Minimum time between last-seen updates of connected addresses.
pub const CONNECTED_UPDATE_INTERVAL: LocalDuration = LocalDuration::from_mins(20);

/// Address manager configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// IP-to-ASN map used to group addresses by autonomous system.
    pub asmap: Option<Asmap>,
    /// Run the consistency check before and after one in this many operations.
    /// Zero disables the check.
    pub consistency_check_ratio: u32,
    /// Use a fixed key and random seed, for reproducible tests.
    pub deterministic: bool,
}

/// Manages peer network addresses.
///
/// All operations take `&self` and may be called from multiple threads.
#[derive(Debug)]
pub struct AddressManager<C> {
    state: Mutex<State>,
    asmap: Option<Arc<Asmap>>,
    consistency_check_ratio: u32,
    deterministic: bool,
    clock: C,
}

impl<C: Clock> AddressManager<C> {
    /// Create a new, empty address manager.
    pub fn new(cfg: Config, rng: fastrand::Rng, clock: C) -> Self {
        let asmap = cfg.asmap.map(Arc::new);
        let state = State::new(rng, asmap.clone(), cfg.deterministic);

        Self {
            state: Mutex::new(state),
            asmap,
            consistency_check_ratio: cfg.consistency_check_ratio,
            deterministic: cfg.deterministic,
            clock,
        }
    }

    /// Number of known addresses.
    pub fn len(&self) -> usize {
        self.state.lock().len()
    }

    /// Whether there are no known addresses.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of addresses in the "new" table.
    pub fn new_count(&self) -> usize {
        self.state.lock().n_new
    }

    /// Number of addresses in the "tried" table.
    pub fn tried_count(&self) -> usize {
        self.state.lock().n_tried
    }

    /// Forget all addresses, and generate a new key.
    pub fn clear(&self) {
        let mut state = self.state.lock();

        self.sample_check(&state);
        state.clear();
        self.sample_check(&state);
    }

    /// Add addresses learned from `source`. The last-seen time of addresses that
    /// `source` isn't announcing about itself is pushed back by `penalty`.
    ///
    /// Returns whether any address was added or updated.
    pub fn add(
        &self,
        addrs: impl IntoIterator<Item = Address>,
        source: net::IpAddr,
        penalty: LocalDuration,
    ) -> bool {
        let now = self.clock.local_time();
        let mut state = self.state.lock();

        self.sample_check(&state);
        let added = state.add(addrs, &source, penalty, now);
        self.sample_check(&state);

        added
    }

    /// Mark an address as good, ie. we completed a connection to it. With
    /// `test_before_evict`, a colliding "tried" address is kept until it's been
    /// tested; see [`AddressManager::resolve_collisions`].
    pub fn good(&self, addr: &net::SocketAddr, test_before_evict: bool, time: LocalTime) {
        let mut state = self.state.lock();

        self.sample_check(&state);
        state.good(addr, test_before_evict, time);
        self.sample_check(&state);
    }

    /// Record a connection attempt to an address. Failures are only counted once
    /// per success of any address.
    pub fn attempt(&self, addr: &net::SocketAddr, count_failure: bool, time: LocalTime) {
        let mut state = self.state.lock();

        self.sample_check(&state);
        state.attempt(addr, count_failure, time);
        self.sample_check(&state);
    }

    /// Choose an address to connect to, and return it along with the time of its
    /// last connection attempt.
    pub fn select(&self, new_only: bool) -> Option<(Address, LocalTime)> {
        let now = self.clock.local_time();
        let state = self.state.lock();

        self.sample_check(&state);
        let selected = state.select(new_only, now);
        self.sample_check(&state);

        selected
    }

    /// Return a random sample of usable addresses, eg. to share with a peer. At most
    /// `max_count` addresses or `max_pct` percent of all addresses are returned,
    /// whichever is lower; zero means no limit.
    pub fn get_addr(
        &self,
        max_count: usize,
        max_pct: usize,
        network: Option<Network>,
    ) -> Vec<Address> {
        let now = self.clock.local_time();
        let mut state = self.state.lock();

        self.sample_check(&state);
        let addrs = state.get_addr(max_count, max_pct, network, now);
        self.sample_check(&state);

        addrs
    }

    /// We're connected to this address. Its last-seen time is only updated if it is
    /// older than [`CONNECTED_UPDATE_INTERVAL`].
    pub fn connected(&self, addr: &net::SocketAddr, time: LocalTime) {
        let mut state = self.state.lock();

        self.sample_check(&state);
        state.connected(addr, time);
        self.sample_check(&state);
    }

    /// Overwrite the services of an address.
    pub fn set_services(&self, addr: &net::SocketAddr, services: ServiceFlags) {
        let mut state = self.state.lock();

        self.sample_check(&state);
        state.set_services(addr, services);
        self.sample_check(&state);
    }

    /// Settle pending "tried" table collisions.
    pub fn resolve_collisions(&self) {
        let now = self.clock.local_time();
        let mut state = self.state.lock();

        self.sample_check(&state);
        state.resolve_collisions(now);
        self.sample_check(&state);
    }

    /// Return a "tried" address that a pending address collides with, so that it
    /// can be tested, along with the time of its last connection attempt.
    pub fn select_tried_collision(&self) -> Option<(Address, LocalTime)> {
        let mut state = self.state.lock();

        self.sample_check(&state);
        let incumbent = state.select_tried_collision();
        self.sample_check(&state);

        incumbent
    }

    /// Autonomous system of an address, or zero if unknown.
    pub fn mapped_as(&self, ip: &net::IpAddr) -> u32 {
        network::mapped_as(ip, self.asmap.as_deref())
    }

    /// Serialize the address manager.
    pub fn serialize<W: io::Write + ?Sized>(&self, w: &mut W) -> Result<usize, Error> {
        let mut buf = Vec::new();
        {
            let state = self.state.lock();

            self.sample_check(&state);
            state.encode(&mut buf)?;
        }
        w.write_all(&buf)?;

        Ok(buf.len())
    }

    /// Replace the contents of the address manager with serialized data. On error,
    /// the address manager is left unchanged.
    ///
    /// Decoding happens while holding the lock, so no concurrent update is lost.
    pub fn deserialize<R: io::Read + ?Sized>(&self, r: &mut R) -> Result<(), Error> {
        let mut state = self.state.lock();

        self.sample_check(&state);
        let rng = state.rng.clone();
        *state = State::decode(r, rng, self.asmap.clone(), self.deterministic)?;
        self.sample_check(&state);

        Ok(())
    }

    /// Run the consistency check.
    pub fn check(&self) -> Result<(), Inconsistency> {
        self.state.lock().check()
    }

    /// Run the consistency check, if this operation is sampled.
    fn sample_check(&self, state: &State) {
        if self.consistency_check_ratio == 0 {
            return;
        }
        if state.rng.u32(..self.consistency_check_ratio) != 0 {
            return;
        }
        if let Err(err) = state.check() {
            log::error!(
                target: "addrman",
                "Consistency check failed with code {}: {}", err.code(), err
            );
            if cfg!(debug_assertions) {
                panic!("address manager is inconsistent: {}", err);
            }
        }
    }
}
