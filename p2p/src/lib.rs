//! Stochastic peer address manager.
//!
//! The [`AddressManager`][addrmgr] keeps track of peer addresses learned from the
//! network, and picks addresses to connect to in a way that's hard for an attacker
//! to bias, even one that controls many addresses. The manager's state can be
//! stored to and loaded from a peers file with the [peers](crate::peers) module.
//!
//! The typical lifecycle of an address is:
//!
//! 1. A peer tells us about it, and it is [added][add] to the "new" table.
//! 2. We [select][select] it, and record an [attempt][attempt] to connect to it.
//! 3. The connection succeeds, and the address is marked [good][good], which moves
//!    it to the "tried" table.
//!
//! [addrmgr]: crate::addrmgr::AddressManager
//! [add]: crate::addrmgr::AddressManager::add
//! [select]: crate::addrmgr::AddressManager::select
//! [attempt]: crate::addrmgr::AddressManager::attempt
//! [good]: crate::addrmgr::AddressManager::good
//!
#![allow(clippy::type_complexity)]
#![allow(clippy::new_without_default)]
#![deny(missing_docs, unsafe_code)]
pub mod addrmgr;
pub mod error;
pub mod peers;

pub use addrman_common::bitcoin;

pub use addrmgr::{AddressManager, Config};
pub use error::Error;
