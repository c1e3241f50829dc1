//! Address manager errors.

use addrman_common::bitcoin::consensus::encode;

use std::io;

use thiserror::Error;

use crate::addrmgr::Inconsistency;

/// An error loading or storing the address manager.
#[derive(Error, Debug)]
pub enum Error {
    /// An I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// An encoding/decoding error, including truncated input.
    #[error("encode/decode error: {0}")]
    Encode(#[from] encode::Error),

    /// The serialized data is corrupt.
    #[error("corrupt address manager data: {0}")]
    Corrupt(String),

    /// The serialized data uses a format we don't understand.
    #[error(
        "unsupported address manager format {format}: it is compatible with \
         formats >= {lowest_compatible}, but the maximum supported is {supported}"
    )]
    UnsupportedFormat {
        /// Format of the data.
        format: u8,
        /// Lowest format version able to read the data.
        lowest_compatible: u8,
        /// Highest format version we support.
        supported: u8,
    },

    /// The data was decoded but failed the consistency check.
    #[error("corrupt data: consistency check failed with code {code}: {0}", code = .0.code())]
    Inconsistent(Inconsistency),

    /// The file was written for another network.
    #[error("invalid network magic")]
    Magic,

    /// The file checksum doesn't match its contents.
    #[error("checksum mismatch")]
    Checksum,
}
