//! Peer addresses, as gossiped on the network.
use std::net;

use microserde as serde;

use bitcoin::network::constants::ServiceFlags;

use crate::network::{self, Network};
use crate::time::LocalTime;

/// A network address with the services it advertises, and the time it was last
/// seen by whoever relayed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Address {
    /// Socket address. Always in canonical form.
    pub addr: net::SocketAddr,
    /// Services advertised by the peer.
    pub services: ServiceFlags,
    /// Last time the address was seen.
    pub time: LocalTime,
}

impl Address {
    /// Create a new address.
    pub fn new(addr: net::SocketAddr, services: ServiceFlags, time: LocalTime) -> Self {
        Self {
            addr: network::canonical_socket(&addr),
            services,
            time,
        }
    }

    /// The IP address.
    pub fn ip(&self) -> net::IpAddr {
        self.addr.ip()
    }

    /// The port.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// The network this address belongs to.
    pub fn network(&self) -> Network {
        Network::of(&self.addr.ip())
    }

    /// Whether the address is routable.
    pub fn is_routable(&self) -> bool {
        network::is_routable(&self.addr.ip())
    }

    /// Byte key identifying this address: the 16-byte IP followed by the
    /// big-endian port.
    pub fn key(&self) -> [u8; 18] {
        let mut key = [0; 18];

        key[..16].copy_from_slice(&network::ip_bytes(&self.addr.ip()));
        key[16..].copy_from_slice(&self.addr.port().to_be_bytes());
        key
    }

    /// Convert to a JSON value.
    pub fn to_json(&self) -> serde::json::Value {
        use serde::json::{Number, Object, Value};

        let mut obj = Object::new();

        obj.insert("address".to_owned(), Value::String(self.addr.to_string()));
        obj.insert(
            "services".to_owned(),
            Value::Number(Number::U64(self.services.to_u64())),
        );
        obj.insert(
            "time".to_owned(),
            Value::Number(Number::U64(self.time.block_time() as u64)),
        );
        obj.insert(
            "network".to_owned(),
            Value::String(self.network().to_string()),
        );

        Value::Object(obj)
    }

    /// Convert from a JSON value.
    pub fn from_json(v: serde::json::Value) -> Result<Self, serde::Error> {
        use serde::json::{Number, Value};

        let obj = match v {
            Value::Object(obj) => obj,
            _ => return Err(serde::Error),
        };

        let addr: net::SocketAddr = match obj.get("address") {
            Some(Value::String(addr)) => addr.parse().map_err(|_| serde::Error)?,
            _ => return Err(serde::Error),
        };
        let services = match obj.get("services") {
            Some(Value::Number(Number::U64(srv))) => ServiceFlags::from(*srv),
            _ => return Err(serde::Error),
        };
        let time = match obj.get("time") {
            Some(Value::Number(Number::U64(n))) => LocalTime::from_block_time(*n as u32),
            _ => return Err(serde::Error),
        };

        Ok(Self::new(addr, services, time))
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical() {
        let mapped: net::SocketAddr = "[::ffff:1.2.3.4]:8333".parse().unwrap();
        let addr = Address::new(mapped, ServiceFlags::NONE, LocalTime::EPOCH);

        assert_eq!(addr.addr, ([1, 2, 3, 4], 8333).into());
        assert_eq!(addr.network(), Network::Ipv4);
        assert_eq!(
            addr.key(),
            [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xff, 0xff, 1, 2, 3, 4, 0x20, 0x8d]
        );
    }

    #[test]
    fn test_json() {
        let addr = Address::new(
            ([8, 8, 8, 8], 8333).into(),
            ServiceFlags::NETWORK,
            LocalTime::from_secs(42),
        );
        let value = addr.to_json();
        let deserialized = Address::from_json(value).unwrap();

        assert_eq!(addr, deserialized);
    }
}
