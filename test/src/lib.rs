//! Testing utilities for addrman crates.
use std::net;

use addrman_common::address::Address;
use addrman_common::bitcoin::network::constants::ServiceFlags;
use addrman_common::time::LocalTime;

pub mod logger {
    use log::*;

    struct Logger {
        level: Level,
    }

    impl Log for Logger {
        fn enabled(&self, metadata: &Metadata) -> bool {
            metadata.level() <= self.level
        }

        fn log(&self, record: &Record) {
            if self.enabled(record.metadata()) {
                println!("test> [{}] {}", record.target(), record.args())
            }
        }

        fn flush(&self) {}
    }

    pub fn init(level: Level) {
        let logger = Logger { level };

        log::set_boxed_logger(Box::new(logger)).ok();
        log::set_max_level(level.to_level_filter());
    }
}

/// Generate a random routable IPv4 address in `250.0.0.0/8`.
pub fn ipv4(rng: &fastrand::Rng) -> net::IpAddr {
    net::Ipv4Addr::new(250, rng.u8(..), rng.u8(..), rng.u8(1..)).into()
}

/// Generate a random routable IPv6 address in `2a00::/16`.
pub fn ipv6(rng: &fastrand::Rng) -> net::IpAddr {
    net::Ipv6Addr::new(
        0x2a00,
        rng.u16(..),
        rng.u16(..),
        rng.u16(..),
        0,
        0,
        0,
        rng.u16(1..),
    )
    .into()
}

/// Generate a random routable address, seen at the given time.
pub fn address(rng: &fastrand::Rng, time: LocalTime) -> Address {
    let ip = if rng.u8(..4) == 0 { ipv6(rng) } else { ipv4(rng) };

    Address::new(
        net::SocketAddr::new(ip, 8333),
        ServiceFlags::NETWORK | ServiceFlags::WITNESS,
        time,
    )
}

/// Generate `n` random routable addresses, seen at the given time.
pub fn addresses(rng: &fastrand::Rng, n: usize, time: LocalTime) -> Vec<Address> {
    (0..n).map(|_| address(rng, time)).collect()
}

/// Hand-assembled AS maps.
pub mod asmap {
    use addrman_common::asmap::Asmap;

    /// Largest ASN that fits the smallest ASN encoding.
    pub const MAX_SMALL_ASN: u32 = 1 << 15;

    /// Append `value` as `bits` bits, most significant first.
    fn push(program: &mut Vec<bool>, value: u32, bits: u8) {
        for i in (0..bits).rev() {
            program.push((value >> i) & 1 == 1);
        }
    }

    /// Append a `RETURN asn` instruction. The ASN must be in `1..=MAX_SMALL_ASN`.
    fn ret(program: &mut Vec<bool>, asn: u32) {
        assert!(asn >= 1 && asn <= MAX_SMALL_ASN);

        // Instruction type, then the smallest ASN class.
        program.extend([false, false]);
        push(program, asn - 1, 15);
    }

    fn finish(mut program: Vec<bool>) -> Asmap {
        while program.len() % 8 != 0 {
            program.push(false);
        }
        Asmap::from_bits(program).unwrap()
    }

    /// A map sending every address to the same AS.
    pub fn constant(asn: u32) -> Asmap {
        let mut program = Vec::new();
        ret(&mut program, asn);

        finish(program)
    }

    /// A map sending addresses whose first bit is zero, which includes all IPv4
    /// addresses, to `zero`, and every other address to `one`.
    pub fn split(zero: u32, one: u32) -> Asmap {
        let mut program = Vec::new();

        // `JUMP` over the first branch, which is one `RETURN` long.
        program.extend([true, false]);
        program.push(false);
        push(&mut program, 0, 5);

        ret(&mut program, zero);
        ret(&mut program, one);

        finish(program)
    }
}
