//! Library of common functionality shared by all `addrman` crates.
#![allow(clippy::type_complexity)]
#![warn(missing_docs)]
pub mod address;
pub mod asmap;
pub mod collections;
pub mod network;
pub mod time;

pub use bitcoin;
