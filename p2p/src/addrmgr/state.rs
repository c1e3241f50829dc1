//! Address manager state, and the operations on it.
//!
//! Nothing in here locks or checks consistency; that is left to the
//! [`super::AddressManager`] facade.
use std::collections::{BTreeMap, BTreeSet};
use std::net;
use std::sync::Arc;

use addrman_common::address::Address;
use addrman_common::asmap::Asmap;
use addrman_common::bitcoin::network::constants::ServiceFlags;
use addrman_common::collections::HashMap;
use addrman_common::network::{self, Network};
use addrman_common::time::{LocalDuration, LocalTime};

use super::bucket::Key;
use super::info::{AddrInfo, Id};
use super::table::Table;
use super::{
    BUCKET_SIZE, CONNECTED_UPDATE_INTERVAL, MAX_NEW_REFS, NEW_BUCKET_COUNT, REPLACEMENT,
    TEST_WINDOW, TRIED_BUCKET_COUNT, TRIED_COLLISION_SIZE, TRY_GRACE,
};

/// Seed of the random generator in deterministic mode.
const DETERMINISTIC_SEED: u64 = 0;
/// An address seen within this window is considered online.
const ONLINE_WINDOW: LocalDuration = LocalDuration::from_hours(24);
/// Last-seen time update interval for online addresses.
const ONLINE_UPDATE_INTERVAL: LocalDuration = LocalDuration::from_hours(1);
/// Last-seen time update interval for offline addresses.
const OFFLINE_UPDATE_INTERVAL: LocalDuration = LocalDuration::from_hours(24);
/// Initial value of the last global success. Later than the Epoch, so that
/// "never" is strictly older.
const LAST_GOOD_INIT: LocalTime = LocalTime::from_secs(1);
/// Probability scale used when sampling by chance.
const CHANCE_SCALE: u32 = 1 << 30;
/// Growth of the acceptance factor after each rejected selection round.
const CHANCE_FACTOR_GROWTH: f64 = 1.2;

/// The complete state of the address manager.
#[derive(Debug)]
pub struct State {
    /// Secret bucketing key.
    pub key: Key,
    /// Records, by identifier.
    pub records: BTreeMap<Id, AddrInfo>,
    /// Identifiers, by address.
    pub index: HashMap<net::SocketAddr, Id>,
    /// Random-order index of all identifiers.
    pub random: Vec<Id>,
    /// The "new" table.
    pub new: Table,
    /// The "tried" table.
    pub tried: Table,
    /// "New" records waiting for a slot in the "tried" table.
    pub collisions: BTreeSet<Id>,
    /// Next record identifier.
    pub next_id: Id,
    /// Number of records in the "new" table.
    pub n_new: usize,
    /// Number of records in the "tried" table.
    pub n_tried: usize,
    /// Last time any address was marked good.
    pub last_good: LocalTime,
    /// Source of randomness.
    pub rng: fastrand::Rng,
    /// Optional IP-to-ASN map used for grouping.
    pub asmap: Option<Arc<Asmap>>,
    /// Whether to use a fixed key and seed.
    pub deterministic: bool,
}

impl State {
    /// Create an empty state.
    pub fn new(rng: fastrand::Rng, asmap: Option<Arc<Asmap>>, deterministic: bool) -> Self {
        let index = HashMap::with_hasher((&rng).into());
        let mut state = Self {
            key: Key::default(),
            records: BTreeMap::new(),
            index,
            random: Vec::new(),
            new: Table::new(NEW_BUCKET_COUNT),
            tried: Table::new(TRIED_BUCKET_COUNT),
            collisions: BTreeSet::new(),
            next_id: 0,
            n_new: 0,
            n_tried: 0,
            last_good: LAST_GOOD_INIT,
            rng,
            asmap,
            deterministic,
        };
        state.clear();
        state
    }

    /// Forget all addresses and pick a new key.
    pub fn clear(&mut self) {
        if self.deterministic {
            self.key = Key::deterministic();
            self.rng.seed(DETERMINISTIC_SEED);
        } else {
            self.key = Key::random(&self.rng);
        }
        self.records.clear();
        self.index.clear();
        self.random.clear();
        self.new.clear();
        self.tried.clear();
        self.collisions.clear();
        self.next_id = 0;
        self.n_new = 0;
        self.n_tried = 0;
        self.last_good = LAST_GOOD_INIT;
    }

    /// Number of known addresses.
    pub fn len(&self) -> usize {
        self.random.len()
    }

    /// The AS map, if any.
    pub fn asmap(&self) -> Option<&Asmap> {
        self.asmap.as_deref()
    }

    /// Find the record of an address.
    pub fn find(&self, addr: &net::SocketAddr) -> Option<Id> {
        self.index.get(&network::canonical_socket(addr)).copied()
    }

    /// Bucket and position of a record in the "tried" table.
    pub fn tried_slot(&self, addr: &Address) -> (usize, usize) {
        let bucket = self.key.tried_bucket(addr, self.asmap());
        (bucket, self.key.position(false, bucket, addr))
    }

    /// Bucket and position of a record in the "new" table, given its source.
    pub fn new_slot(&self, addr: &Address, source: &net::IpAddr) -> (usize, usize) {
        let bucket = self.key.new_bucket(addr, source, self.asmap());
        (bucket, self.key.position(true, bucket, addr))
    }

    /// Create a record and add it to the random-order index.
    pub fn create(&mut self, addr: Address, source: net::IpAddr) -> Id {
        let id = self.next_id;
        let mut info = AddrInfo::new(addr, source);

        info.random_pos = self.random.len();

        self.next_id += 1;
        self.index.insert(addr.addr, id);
        self.records.insert(id, info);
        self.random.push(id);

        id
    }

    /// Swap two entries of the random-order index.
    pub fn swap_random(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        let (id_a, id_b) = (self.random[a], self.random[b]);

        if let Some(info) = self.records.get_mut(&id_a) {
            info.random_pos = b;
        }
        if let Some(info) = self.records.get_mut(&id_b) {
            info.random_pos = a;
        }
        self.random.swap(a, b);
    }

    /// Delete a "new" record that is no longer referenced by any slot.
    pub fn delete(&mut self, id: Id) {
        let pos = match self.records.get(&id) {
            Some(info) => {
                debug_assert!(!info.in_tried);
                debug_assert_eq!(info.ref_count, 0);

                info.random_pos
            }
            None => return,
        };
        let last = self.random.len() - 1;

        self.swap_random(pos, last);
        self.random.pop();

        if let Some(info) = self.records.remove(&id) {
            self.index.remove(&info.addr.addr);
        }
        self.n_new -= 1;
    }

    /// Empty a slot of the "new" table, deleting its occupant if this was its
    /// last reference.
    fn clear_new(&mut self, bucket: usize, pos: usize) {
        let id = match self.new.take(bucket, pos) {
            Some(id) => id,
            None => return,
        };
        let unreferenced = match self.records.get_mut(&id) {
            Some(info) => {
                info.ref_count -= 1;

                log::debug!(
                    target: "addrman",
                    "Removed {} from new[{}][{}]", info.addr, bucket, pos
                );
                info.ref_count == 0
            }
            None => false,
        };
        if unreferenced {
            self.delete(id);
        }
    }

    /// Move a record from the "new" table to the "tried" table. Whatever occupies
    /// its slot there is moved back to the "new" table.
    fn make_tried(&mut self, id: Id) {
        let (addr, source, mut refs) = match self.records.get(&id) {
            Some(info) => (info.addr, info.source, info.ref_count),
            None => return,
        };

        // Remove the record from every "new" bucket referencing it.
        let start = self.key.new_bucket(&addr, &source, self.asmap());
        for n in 0..NEW_BUCKET_COUNT {
            if refs == 0 {
                break;
            }
            let bucket = (start + n) % NEW_BUCKET_COUNT;
            let pos = self.key.position(true, bucket, &addr);

            if self.new.get(bucket, pos) == Some(id) {
                self.new.take(bucket, pos);
                refs -= 1;
            }
        }
        debug_assert_eq!(refs, 0);
        self.n_new -= 1;

        let (bucket, pos) = self.tried_slot(&addr);

        if let Some(evicted) = self.tried.take(bucket, pos) {
            self.n_tried -= 1;

            let (old_addr, old_source) = match self.records.get_mut(&evicted) {
                Some(old) => {
                    old.in_tried = false;
                    (old.addr, old.source)
                }
                None => return,
            };
            let (new_bucket, new_pos) = self.new_slot(&old_addr, &old_source);

            self.clear_new(new_bucket, new_pos);

            if let Some(old) = self.records.get_mut(&evicted) {
                old.ref_count = 1;
            }
            self.new.set(new_bucket, new_pos, evicted);
            self.n_new += 1;

            log::debug!(
                target: "addrman",
                "Moved {} from tried[{}][{}] to new[{}][{}] to make space",
                old_addr, bucket, pos, new_bucket, new_pos
            );
        }
        self.tried.set(bucket, pos, id);
        self.n_tried += 1;

        if let Some(info) = self.records.get_mut(&id) {
            info.ref_count = 0;
            info.in_tried = true;
        }
    }

    /// Add a single address. Returns whether it was added or updated.
    fn add_single(
        &mut self,
        addr: &Address,
        source: &net::IpAddr,
        penalty: LocalDuration,
        now: LocalTime,
    ) -> bool {
        if !addr.is_routable() {
            return false;
        }
        // Self-announcements carry no penalty.
        let penalty = if addr.ip() == *source {
            LocalDuration::ZERO
        } else {
            penalty
        };

        let id = match self.find(&addr.addr) {
            Some(id) => {
                let info = match self.records.get_mut(&id) {
                    Some(info) => info,
                    None => return false,
                };
                let interval = if now - addr.time < ONLINE_WINDOW {
                    ONLINE_UPDATE_INTERVAL
                } else {
                    OFFLINE_UPDATE_INTERVAL
                };
                if info.addr.time < addr.time.saturating_sub(interval + penalty) {
                    info.addr.time = addr.time.saturating_sub(penalty);
                }
                info.addr.services = info.addr.services | addr.services;

                // Nothing new.
                if addr.time <= info.addr.time {
                    return false;
                }
                if info.in_tried {
                    return false;
                }
                if info.ref_count >= MAX_NEW_REFS {
                    return false;
                }
                // Each reference makes a further one twice as unlikely.
                let factor = 1u32 << info.ref_count;
                if factor > 1 && self.rng.u32(..factor) != 0 {
                    return false;
                }
                id
            }
            None => {
                let mut addr = *addr;
                addr.time = addr.time.saturating_sub(penalty);

                let id = self.create(addr, *source);
                self.n_new += 1;

                id
            }
        };

        let (stored, refs) = match self.records.get(&id) {
            Some(info) => (info.addr, info.ref_count),
            None => return false,
        };
        let (bucket, pos) = self.new_slot(&stored, source);
        let insert = match self.new.get(bucket, pos) {
            Some(occupant) if occupant == id => return false,
            Some(occupant) => match self.records.get(&occupant) {
                Some(existing) => {
                    existing.is_terrible(now) || (existing.ref_count > 1 && refs == 0)
                }
                None => true,
            },
            None => true,
        };

        if insert {
            self.clear_new(bucket, pos);

            if let Some(info) = self.records.get_mut(&id) {
                info.ref_count += 1;
            }
            self.new.set(bucket, pos, id);

            log::debug!(
                target: "addrman",
                "Added {} mapped to AS{} to new[{}][{}]",
                stored,
                network::mapped_as(&stored.ip(), self.asmap()),
                bucket,
                pos
            );
        } else if refs == 0 {
            self.delete(id);
        }
        insert
    }

    /// Add addresses learned from the given source. Returns whether any address
    /// was added or updated.
    pub fn add(
        &mut self,
        addrs: impl IntoIterator<Item = Address>,
        source: &net::IpAddr,
        penalty: LocalDuration,
        now: LocalTime,
    ) -> bool {
        let source = network::canonical(source);
        let mut added = 0;
        let mut total = 0;

        for addr in addrs {
            let addr = Address::new(addr.addr, addr.services, addr.time);

            total += 1;
            if self.add_single(&addr, &source, penalty, now) {
                added += 1;
            }
        }
        if added > 0 {
            log::debug!(
                target: "addrman",
                "Added {} addresses (of {}) from {}: {} tried, {} new",
                added, total, source, self.n_tried, self.n_new
            );
        }
        added > 0
    }

    /// Mark an address as good, ie. we connected to it successfully.
    pub fn good(&mut self, addr: &net::SocketAddr, test_before_evict: bool, time: LocalTime) {
        self.last_good = time;

        let id = match self.find(addr) {
            Some(id) => id,
            None => return,
        };
        let info = match self.records.get_mut(&id) {
            Some(info) => info,
            None => return,
        };
        info.last_success = time;
        info.last_try = time;
        info.attempts = 0;
        // The last-seen time is not updated, to avoid leaking information about
        // currently connected peers.

        if info.in_tried {
            return;
        }
        if info.ref_count == 0 {
            log::error!(target: "addrman", "Record of {} is in neither table", info.addr);
            return;
        }
        let addr = info.addr;
        let (bucket, pos) = self.tried_slot(&addr);

        match self.tried.get(bucket, pos) {
            Some(occupant) if test_before_evict => {
                if self.collisions.len() < TRIED_COLLISION_SIZE {
                    self.collisions.insert(id);
                }
                log::debug!(
                    target: "addrman",
                    "Collision with {} while attempting to move {} to tried table. Collisions={}",
                    self.records.get(&occupant).map(|o| o.addr.to_string()).unwrap_or_default(),
                    addr,
                    self.collisions.len()
                );
            }
            _ => {
                self.make_tried(id);

                log::debug!(
                    target: "addrman",
                    "Moved {} mapped to AS{} to tried[{}][{}]",
                    addr,
                    network::mapped_as(&addr.ip(), self.asmap()),
                    bucket,
                    pos
                );
            }
        }
    }

    /// Record a connection attempt to an address.
    pub fn attempt(&mut self, addr: &net::SocketAddr, count_failure: bool, time: LocalTime) {
        let id = match self.find(addr) {
            Some(id) => id,
            None => return,
        };
        if let Some(info) = self.records.get_mut(&id) {
            info.last_try = time;

            // Don't count failures that happened before the last global success.
            if count_failure && info.last_count_attempt < self.last_good {
                info.last_count_attempt = time;
                info.attempts += 1;
            }
        }
    }

    /// Pick an address to connect to, weighted by its chance.
    pub fn select(&self, new_only: bool, now: LocalTime) -> Option<(Address, LocalTime)> {
        if self.random.is_empty() || (new_only && self.n_new == 0) {
            return None;
        }
        let use_tried = !new_only && self.n_tried > 0 && (self.n_new == 0 || self.rng.bool());
        let (table, name) = if use_tried {
            (&self.tried, "tried")
        } else {
            (&self.new, "new")
        };
        let mut factor = 1.0;

        loop {
            let bucket = self.rng.usize(..table.buckets());
            let start = self.rng.usize(..BUCKET_SIZE);

            // Empty bucket, try another one.
            let (_, id) = match table.probe(bucket, start) {
                Some(slot) => slot,
                None => continue,
            };
            let info = self.records.get(&id)?;

            if (self.rng.u32(..CHANCE_SCALE) as f64)
                < factor * info.chance(now) * CHANCE_SCALE as f64
            {
                log::debug!(target: "addrman", "Selected {} from {}", info.addr, name);

                return Some((info.addr, info.last_try));
            }
            factor *= CHANCE_FACTOR_GROWTH;
        }
    }

    /// Return a random sample of addresses that aren't terrible.
    ///
    /// The sample size is the smaller of `max_count` and `max_pct` percent of all
    /// addresses. Zero means "no limit" for either.
    pub fn get_addr(
        &mut self,
        max_count: usize,
        max_pct: usize,
        network: Option<Network>,
        now: LocalTime,
    ) -> Vec<Address> {
        let mut n = self.random.len();
        if max_pct != 0 {
            n = max_pct.min(100) * n / 100;
        }
        if max_count != 0 {
            n = n.min(max_count);
        }

        let mut addrs = Vec::with_capacity(n);
        for i in 0..self.random.len() {
            if addrs.len() >= n {
                break;
            }
            let j = self.rng.usize(i..self.random.len());
            self.swap_random(i, j);

            let info = match self.records.get(&self.random[i]) {
                Some(info) => info,
                None => continue,
            };
            if let Some(network) = network {
                if info.addr.network() != network {
                    continue;
                }
            }
            if info.is_terrible(now) {
                continue;
            }
            addrs.push(info.addr);
        }
        log::debug!(target: "addrman", "GetAddr returned {} random addresses", addrs.len());

        addrs
    }

    /// We are connected to this address.
    pub fn connected(&mut self, addr: &net::SocketAddr, time: LocalTime) {
        let id = match self.find(addr) {
            Some(id) => id,
            None => return,
        };
        if let Some(info) = self.records.get_mut(&id) {
            if time - info.addr.time > CONNECTED_UPDATE_INTERVAL {
                info.addr.time = time;
            }
        }
    }

    /// Update the services of an address.
    pub fn set_services(&mut self, addr: &net::SocketAddr, services: ServiceFlags) {
        let id = match self.find(addr) {
            Some(id) => id,
            None => return,
        };
        if let Some(info) = self.records.get_mut(&id) {
            info.addr.services = services;
        }
    }

    /// Settle pending "tried" table collisions where possible.
    pub fn resolve_collisions(&mut self, now: LocalTime) {
        let pending = self.collisions.iter().copied().collect::<Vec<_>>();

        for id in pending {
            let candidate = match self.records.get(&id) {
                Some(info) if network::is_valid(&info.addr.ip()) => {
                    Some((info.addr, info.last_success))
                }
                _ => None,
            };
            let (addr, last_success) = match candidate {
                Some(candidate) => candidate,
                None => {
                    self.collisions.remove(&id);
                    continue;
                }
            };
            let (bucket, pos) = self.tried_slot(&addr);
            let incumbent = self
                .tried
                .get(bucket, pos)
                .and_then(|old| self.records.get(&old))
                .map(|old| (old.addr, old.last_success, old.last_try));

            let resolved = match incumbent {
                // The slot has freed up in the meantime.
                None => {
                    self.good(&addr.addr, false, now);
                    true
                }
                // The incumbent connected recently, keep it.
                Some((_, old_success, _)) if now - old_success < REPLACEMENT => true,
                Some((old, _, old_try)) if now - old_try < REPLACEMENT => {
                    // Give the incumbent some time to connect.
                    if now - old_try > TRY_GRACE {
                        log::debug!(
                            target: "addrman",
                            "Replacing {} with {} in tried table", old, addr
                        );
                        self.good(&addr.addr, false, now);
                        true
                    } else {
                        false
                    }
                }
                Some((old, _, _)) if now - last_success > TEST_WINDOW => {
                    log::debug!(
                        target: "addrman",
                        "Unable to test; replacing {} with {} in tried table anyway", old, addr
                    );
                    self.good(&addr.addr, false, now);
                    true
                }
                Some(_) => false,
            };
            if resolved {
                self.collisions.remove(&id);
            }
        }
    }

    /// Pick a random pending collision, and return the incumbent "tried" address it
    /// collides with, along with its last connection attempt.
    pub fn select_tried_collision(&mut self) -> Option<(Address, LocalTime)> {
        if self.collisions.is_empty() {
            return None;
        }
        let ix = self.rng.usize(..self.collisions.len());
        let id = *self.collisions.iter().nth(ix)?;

        let addr = match self.records.get(&id) {
            Some(info) => info.addr,
            None => {
                self.collisions.remove(&id);
                return None;
            }
        };
        let (bucket, pos) = self.tried_slot(&addr);
        let incumbent = self.records.get(&self.tried.get(bucket, pos)?)?;

        Some((incumbent.addr, incumbent.last_try))
    }
}
