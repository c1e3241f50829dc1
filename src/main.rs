use argh::FromArgs;
use std::path::PathBuf;
use std::process;

use microserde as serde;

use addrman::common::asmap::Asmap;
use addrman::common::network::Network;
use addrman::common::time::SystemClock;
use addrman::p2p::peers::{self, Magic};
use addrman::p2p::{AddressManager, Config};

/// Network magic of the bitcoin main network.
const MAINNET_MAGIC: Magic = [0xf9, 0xbe, 0xb4, 0xd9];

#[derive(FromArgs)]
/// Inspect a peers file in format 2 or earlier. Newer formats, such as those
/// carrying addrv2 addresses, are refused.
pub struct Options {
    #[argh(option)]
    /// path to the peers file
    pub peers: PathBuf,

    #[argh(option)]
    /// path to an AS map, used to group addresses by autonomous system
    pub asmap: Option<PathBuf>,

    #[argh(option, default = "MAINNET_MAGIC", from_str_fn(parse_magic))]
    /// network magic the peers file was written with, in hex (default: f9beb4d9)
    pub magic: Magic,

    #[argh(switch)]
    /// run the consistency check after loading (default: false)
    pub check: bool,

    #[argh(option, default = "0")]
    /// print this many selected addresses (default: 0)
    pub sample: usize,

    #[argh(switch)]
    /// print shareable addresses as JSON (default: false)
    pub json: bool,

    #[argh(option)]
    /// only print addresses of this network, with `--json`
    pub network: Option<Network>,

    #[argh(option, default = "log::LevelFilter::Info")]
    /// log level (default: info)
    pub log: log::LevelFilter,
}

impl Options {
    pub fn from_env() -> Self {
        argh::from_env()
    }
}

fn parse_magic(s: &str) -> Result<Magic, String> {
    if s.len() != 8 || !s.is_ascii() {
        return Err(format!("invalid magic `{}`: expected 4 hex-encoded bytes", s));
    }
    let mut magic = Magic::default();

    for (i, byte) in magic.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16)
            .map_err(|e| format!("invalid magic `{}`: {}", s, e))?;
    }
    Ok(magic)
}

fn main() {
    let opts = Options::from_env();

    {
        use atty::Stream;
        use fern::colors::{Color, ColoredLevelConfig};

        let colors = ColoredLevelConfig::new().info(Color::Green);
        let stream = Stream::Stderr;
        let io = std::io::stderr();
        let isatty = atty::is(stream);

        let result = fern::Dispatch::new()
            .format(move |out, message, record| {
                if isatty {
                    out.finish(format_args!(
                        "{:5} [{}] {}",
                        colors.color(record.level()),
                        record.target(),
                        message
                    ))
                } else {
                    out.finish(format_args!(
                        "{:5} [{}] {}",
                        record.level(),
                        record.target(),
                        message
                    ))
                }
            })
            .level(opts.log)
            .chain(io)
            .apply();

        if let Err(err) = result {
            eprintln!("error: failed to initialize logger: {}", err);
        }
    }

    if let Err(err) = run(opts) {
        log::error!("{}", err);
        process::exit(1);
    }
}

fn run(opts: Options) -> Result<(), Box<dyn std::error::Error>> {
    let asmap = match &opts.asmap {
        Some(path) => Some(Asmap::load(path)?),
        None => None,
    };
    let cfg = Config {
        asmap,
        ..Config::default()
    };
    let addrmgr = AddressManager::new(cfg, fastrand::Rng::new(), SystemClock);

    if !peers::read(&opts.peers, opts.magic, &addrmgr)? {
        return Err(format!("peers file {} not found", opts.peers.display()).into());
    }
    if opts.check {
        if let Err(err) = addrmgr.check() {
            return Err(format!(
                "consistency check failed with code {}: {}",
                err.code(),
                err
            )
            .into());
        }
        log::info!("Consistency check passed");
    }

    println!("new: {}", addrmgr.new_count());
    println!("tried: {}", addrmgr.tried_count());
    println!("total: {}", addrmgr.len());

    for _ in 0..opts.sample {
        if let Some((addr, last_try)) = addrmgr.select(false) {
            println!("{} services={} last-try={}", addr, addr.services, last_try);
        }
    }

    if opts.json {
        let addrs = addrmgr
            .get_addr(0, 0, opts.network)
            .iter()
            .map(|a| a.to_json())
            .collect();

        println!("{}", serde::json::to_string(&serde::json::Value::Array(addrs)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_magic() {
        assert_eq!(parse_magic("f9beb4d9"), Ok(MAINNET_MAGIC));
        assert_eq!(parse_magic("0B110907"), Ok([0x0b, 0x11, 0x09, 0x07]));
        assert!(parse_magic("f9beb4").is_err());
        assert!(parse_magic("f9beb4zz").is_err());
        assert!(parse_magic("f9beb4é").is_err());
    }
}
