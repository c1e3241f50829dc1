//! A stochastic peer address manager for Bitcoin nodes.
//!
//! The project is broken down into the following crates:
//!
//! * [`p2p`]: the address manager and its peers file
//! * [`common`]: time, network and AS map functionality used by all crates
//!
//! The [`p2p::AddressManager`] is the entry point for most users of the library.

pub use addrman_common as common;
pub use addrman_p2p as p2p;
