//! Peers file. Stores the address manager on disk.
//!
//! The file holds the network magic, the serialized address manager, and a
//! double-SHA256 checksum of both.
use std::fs;
use std::io::{self, prelude::*};
use std::path::Path;

use addrman_common::bitcoin::hashes::{sha256d, Hash};
use addrman_common::time::Clock;

use crate::addrmgr::AddressManager;
use crate::error::Error;

/// Network magic, identifying the network a peers file was written for.
pub type Magic = [u8; 4];

/// Size of the trailing checksum.
const CHECKSUM_SIZE: usize = 32;

/// Write the address manager to the given path, replacing any existing file
/// atomically.
pub fn write<P: AsRef<Path>, C: Clock>(
    path: P,
    magic: Magic,
    addrmgr: &AddressManager<C>,
) -> Result<(), Error> {
    let path = path.as_ref();
    let mut data = magic.to_vec();

    addrmgr.serialize(&mut data)?;
    let checksum = sha256d::Hash::hash(&data).into_inner();
    data.extend_from_slice(&checksum);

    // The temporary file lives next to the destination, so that it can be renamed.
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::Builder::new()
        .prefix(".peers.")
        .tempfile_in(dir)?;

    tmp.write_all(&data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|err| err.error)?;

    log::debug!(
        target: "addrman",
        "Wrote {} addresses ({} bytes) to {}", addrmgr.len(), data.len(), path.display()
    );
    Ok(())
}

/// Load the address manager from the given path. Returns `false` if there is no
/// file at that path, in which case the address manager is left untouched.
pub fn read<P: AsRef<Path>, C: Clock>(
    path: P,
    magic: Magic,
    addrmgr: &AddressManager<C>,
) -> Result<bool, Error> {
    let path = path.as_ref();
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            log::debug!(target: "addrman", "No peers file found at {}", path.display());
            return Ok(false);
        }
        Err(err) => return Err(err.into()),
    };
    if data.len() < magic.len() + CHECKSUM_SIZE {
        return Err(Error::Corrupt(format!(
            "peers file is too short ({} bytes)",
            data.len()
        )));
    }
    let (payload, checksum) = data.split_at(data.len() - CHECKSUM_SIZE);

    if payload[..magic.len()] != magic {
        return Err(Error::Magic);
    }
    if sha256d::Hash::hash(payload).into_inner()[..] != *checksum {
        return Err(Error::Checksum);
    }
    addrmgr.deserialize(&mut &payload[magic.len()..])?;

    log::debug!(
        target: "addrman",
        "Loaded {} addresses from {}", addrmgr.len(), path.display()
    );
    Ok(true)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::addrmgr::Config;
    use addrman_common::time::{LocalDuration, LocalTime};

    const MAGIC: Magic = [0xf9, 0xbe, 0xb4, 0xd9];

    fn addrmgr() -> AddressManager<LocalTime> {
        let time = LocalTime::from_secs(1_700_000_000);
        let rng = fastrand::Rng::with_seed(1);
        let addrmgr = AddressManager::new(Config::default(), rng.clone(), time);

        addrmgr.add(
            addrman_test::addresses(&rng, 64, time - LocalDuration::from_hours(1)),
            [250, 7, 7, 7].into(),
            LocalDuration::ZERO,
        );
        addrmgr
    }

    #[test]
    fn test_write_and_read() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("peers.dat");
        let addrmgr = addrmgr();

        let loaded = AddressManager::new(
            Config::default(),
            fastrand::Rng::with_seed(2),
            LocalTime::from_secs(1_700_000_000),
        );
        assert!(!read(&path, MAGIC, &loaded).unwrap());
        assert!(loaded.is_empty());

        write(&path, MAGIC, &addrmgr).unwrap();
        assert!(read(&path, MAGIC, &loaded).unwrap());

        assert_eq!(loaded.len(), addrmgr.len());
        assert_eq!(loaded.new_count(), addrmgr.new_count());
        assert_eq!(loaded.check(), Ok(()));

        // Overwriting works.
        write(&path, MAGIC, &loaded).unwrap();
        assert!(read(&path, MAGIC, &loaded).unwrap());
        assert_eq!(loaded.len(), addrmgr.len());
    }

    #[test]
    fn test_read_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("peers.dat");
        let addrmgr = addrmgr();
        let len = addrmgr.len();

        write(&path, MAGIC, &addrmgr).unwrap();
        assert!(matches!(
            read(&path, [0x0b, 0x11, 0x09, 0x07], &addrmgr),
            Err(Error::Magic)
        ));

        let mut data = fs::read(&path).unwrap();
        let ix = data.len() / 2;
        data[ix] ^= 0xff;
        fs::write(&path, &data).unwrap();

        assert!(matches!(
            read(&path, MAGIC, &addrmgr),
            Err(Error::Checksum)
        ));

        fs::write(&path, &data[..16]).unwrap();
        assert!(matches!(
            read(&path, MAGIC, &addrmgr),
            Err(Error::Corrupt(_))
        ));
        assert_eq!(addrmgr.len(), len, "the address manager is left untouched");
    }
}
