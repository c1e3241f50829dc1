//! IP-to-ASN mapping.
//!
//! An AS map is a compact, bit-packed decision program which maps IP prefixes to
//! autonomous system numbers. It is supplied externally and used to group peer
//! addresses by the network operator that announces them.
use std::path::Path;
use std::{fs, io};

use bitcoin::consensus::encode::{serialize, VarInt};
use bitcoin::hashes::{sha256d, Hash};
use thiserror::Error;

/// Number of bits in an IP address, as seen by the interpreter.
pub const IP_BITS: u8 = 128;

/// Sentinel for a value that couldn't be decoded.
const INVALID: u32 = u32::MAX;

/// Bit sizes of the instruction type encoding.
const TYPE_BIT_SIZES: [u8; 3] = [0, 0, 1];
/// Bit sizes of the ASN encoding.
const ASN_BIT_SIZES: [u8; 10] = [15, 16, 17, 18, 19, 20, 21, 22, 23, 24];
/// Bit sizes of the match encoding.
const MATCH_BIT_SIZES: [u8; 8] = [1, 2, 3, 4, 5, 6, 7, 8];
/// Bit sizes of the jump offset encoding.
#[rustfmt::skip]
const JUMP_BIT_SIZES: [u8; 26] = [
    5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17,
    18, 19, 20, 21, 22, 23, 24, 25, 26, 27, 28, 29, 30,
];

/// An error loading an AS map.
#[derive(Error, Debug)]
pub enum Error {
    /// An I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    /// The map is empty.
    #[error("AS map is empty")]
    Empty,
    /// The map failed validation.
    #[error("AS map is malformed")]
    Malformed,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Instruction {
    Return,
    Jump,
    Match,
    Default,
}

/// A validated AS map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asmap {
    bits: Vec<bool>,
}

impl Asmap {
    /// Construct an AS map from raw bytes. Bits are unpacked least-significant
    /// bit first.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let bits = bytes
            .iter()
            .flat_map(|byte| (0..8).map(move |i| (byte >> i) & 1 == 1))
            .collect();

        Self::from_bits(bits)
    }

    /// Construct an AS map from a bit vector.
    pub fn from_bits(bits: Vec<bool>) -> Result<Self, Error> {
        if bits.is_empty() {
            return Err(Error::Empty);
        }
        if !sanity_check(&bits, IP_BITS) {
            return Err(Error::Malformed);
        }
        Ok(Self { bits })
    }

    /// Load an AS map from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let bytes = fs::read(path.as_ref())?;
        let asmap = Self::from_bytes(&bytes)?;

        log::info!(
            target: "addrman",
            "Loaded AS map from {} ({} bits, checksum {})",
            path.as_ref().display(),
            asmap.bits.len(),
            sha256d::Hash::from_inner(asmap.checksum())
        );
        Ok(asmap)
    }

    /// Number of bits in the map.
    pub fn len(&self) -> usize {
        self.bits.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Checksum of the map. Stored alongside serialized address tables, so that a
    /// change of map can be detected on load.
    pub fn checksum(&self) -> [u8; 32] {
        let mut preimage = serialize(&VarInt(self.bits.len() as u64));
        preimage.extend(self.bits.iter().map(|b| *b as u8));

        sha256d::Hash::hash(&preimage).into_inner()
    }

    /// Map the bits of an IP address, most significant first, to an ASN.
    /// Returns `0` if the address isn't mapped.
    pub fn interpret(&self, ip: &[bool]) -> u32 {
        let bits = &self.bits;
        let mut pos = 0;
        let mut remaining = ip.len();
        let mut default_asn = 0;

        while pos < bits.len() {
            match decode_type(bits, &mut pos) {
                Some(Instruction::Return) => {
                    let asn = decode_asn(bits, &mut pos);
                    if asn == INVALID {
                        break;
                    }
                    return asn;
                }
                Some(Instruction::Jump) => {
                    let jump = decode_jump(bits, &mut pos);
                    if jump == INVALID || remaining == 0 {
                        break;
                    }
                    if ip[ip.len() - remaining] {
                        if jump as usize >= bits.len() - pos {
                            break;
                        }
                        pos += jump as usize;
                    }
                    remaining -= 1;
                }
                Some(Instruction::Match) => {
                    let m = decode_match(bits, &mut pos);
                    if m == INVALID {
                        break;
                    }
                    let len = m.count_ones() as usize - 1;
                    if remaining < len {
                        break;
                    }
                    for i in 0..len {
                        let expected = (m >> (len - 1 - i)) & 1 == 1;
                        if ip[ip.len() - remaining] != expected {
                            return default_asn;
                        }
                        remaining -= 1;
                    }
                }
                Some(Instruction::Default) => {
                    default_asn = decode_asn(bits, &mut pos);
                    if default_asn == INVALID {
                        break;
                    }
                }
                None => break,
            }
        }
        // Only reachable with a map that didn't pass validation.
        0
    }
}

/// Validate an AS map program for inputs of the given number of bits.
///
/// A valid program terminates on every path with a `RETURN`, never jumps out of
/// bounds or into the middle of an instruction, and is followed by at most seven
/// bits of zero padding.
pub fn sanity_check(bits: &[bool], mut ip_bits: u8) -> bool {
    // Pending jump targets, and the number of input bits left after each jump.
    let mut jumps: Vec<(usize, u8)> = Vec::with_capacity(ip_bits as usize);
    let mut prev = Instruction::Jump;
    let mut had_incomplete_match = false;
    let mut pos = 0;

    while pos < bits.len() {
        if let Some((target, _)) = jumps.last() {
            if pos >= *target {
                // Jump into the middle of the previous instruction.
                return false;
            }
        }
        match decode_type(bits, &mut pos) {
            Some(Instruction::Return) => {
                if prev == Instruction::Default {
                    return false;
                }
                if decode_asn(bits, &mut pos) == INVALID {
                    return false;
                }
                match jumps.pop() {
                    None => {
                        if bits.len() - pos > 7 {
                            return false;
                        }
                        return bits[pos..].iter().all(|b| !b);
                    }
                    Some((target, remaining)) => {
                        if pos != target {
                            // Unreachable code.
                            return false;
                        }
                        ip_bits = remaining;
                        prev = Instruction::Jump;
                    }
                }
            }
            Some(Instruction::Jump) => {
                let jump = decode_jump(bits, &mut pos);
                if jump == INVALID || jump as usize > bits.len() - pos || ip_bits == 0 {
                    return false;
                }
                ip_bits -= 1;

                let target = pos + jump as usize;
                if let Some((last, _)) = jumps.last() {
                    if target >= *last {
                        // Intersecting jumps.
                        return false;
                    }
                }
                jumps.push((target, ip_bits));
                prev = Instruction::Jump;
            }
            Some(Instruction::Match) => {
                let m = decode_match(bits, &mut pos);
                if m == INVALID {
                    return false;
                }
                let len = m.count_ones() as u8 - 1;

                if prev != Instruction::Match {
                    had_incomplete_match = false;
                }
                // At most one incomplete match in a sequence of matches.
                if len < 8 && had_incomplete_match {
                    return false;
                }
                had_incomplete_match = len < 8;

                if ip_bits < len {
                    return false;
                }
                ip_bits -= len;
                prev = Instruction::Match;
            }
            Some(Instruction::Default) => {
                if prev == Instruction::Default {
                    return false;
                }
                if decode_asn(bits, &mut pos) == INVALID {
                    return false;
                }
                prev = Instruction::Default;
            }
            None => return false,
        }
    }
    // Reached the end without a `RETURN`.
    false
}

/// Decode a variable-length integer. The encoding is a unary prefix selecting
/// one of the given bit sizes, followed by that many bits, most significant first.
fn decode_bits(bits: &[bool], pos: &mut usize, min: u32, sizes: &[u8]) -> u32 {
    let mut val = min as u64;

    for (i, size) in sizes.iter().enumerate() {
        let more = if i + 1 < sizes.len() {
            if *pos >= bits.len() {
                break;
            }
            let b = bits[*pos];
            *pos += 1;
            b
        } else {
            false
        };

        if more {
            val += 1 << size;
        } else {
            for b in 0..*size {
                if *pos >= bits.len() {
                    return INVALID;
                }
                if bits[*pos] {
                    val += 1 << (size - 1 - b);
                }
                *pos += 1;
            }
            return val as u32;
        }
    }
    INVALID
}

fn decode_type(bits: &[bool], pos: &mut usize) -> Option<Instruction> {
    match decode_bits(bits, pos, 0, &TYPE_BIT_SIZES) {
        0 => Some(Instruction::Return),
        1 => Some(Instruction::Jump),
        2 => Some(Instruction::Match),
        3 => Some(Instruction::Default),
        _ => None,
    }
}

fn decode_asn(bits: &[bool], pos: &mut usize) -> u32 {
    decode_bits(bits, pos, 1, &ASN_BIT_SIZES)
}

fn decode_match(bits: &[bool], pos: &mut usize) -> u32 {
    decode_bits(bits, pos, 2, &MATCH_BIT_SIZES)
}

fn decode_jump(bits: &[bool], pos: &mut usize) -> u32 {
    decode_bits(bits, pos, 17, &JUMP_BIT_SIZES)
}
