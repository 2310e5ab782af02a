//! Durable Storage Record (§4.6, §8): the EEPROM-persisted boot/deficit
//! record and its CRC-16/CCITT integrity check.
//!
//! The CRC parameters (init `0xFFFF`, poly `0x1021`, MSB-first, no
//! reflection, no final XOR) and the zero-the-CRC-field-before-computing
//! discipline are carried over byte-for-byte from the source firmware's
//! `hydroponic_storage.c`; only the record shape is richer here (it adds
//! the deficit-accounting fields the distilled design calls for).

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result, StorageError};
use crate::ports::DurableStorePort;

pub const MAGIC: u32 = 0x4859_4450;
pub const VERSION: u8 = 1;

/// Generous fixed buffer for the postcard-encoded record; actual encoded
/// size is well under this with today's field set.
const BUF_LEN: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageRecord {
    pub magic: u32,
    pub version: u8,
    pub boot_count: u32,
    pub last_alive_min: u32,
    pub deficit_minutes: u32,
    pub outage_count: u32,
    pub light_on: bool,
    pub crc16: u16,
}

impl StorageRecord {
    #[must_use]
    pub const fn new(
        boot_count: u32,
        last_alive_min: u32,
        deficit_minutes: u32,
        outage_count: u32,
        light_on: bool,
    ) -> Self {
        Self {
            magic: MAGIC,
            version: VERSION,
            boot_count,
            last_alive_min,
            deficit_minutes,
            outage_count,
            light_on,
            crc16: 0,
        }
    }
}

fn crc16_ccitt(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= u16::from(byte) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}

fn encode(rec: &StorageRecord) -> Result<[u8; BUF_LEN]> {
    let mut buf = [0u8; BUF_LEN];
    postcard::to_slice(rec, &mut buf).map_err(|_| Error::from(StorageError::IoError))?;
    Ok(buf)
}

/// Load and validate the record at `addr`. Magic/version mismatch or a CRC
/// failure both surface as an `Err` — callers treat either as "no valid
/// prior record" (§4.6 "At boot").
pub fn load(store: &mut impl DurableStorePort, addr: u16) -> Result<StorageRecord> {
    let mut buf = [0u8; BUF_LEN];
    store.read(addr, &mut buf)?;
    let rec: StorageRecord =
        postcard::from_bytes(&buf).map_err(|_| Error::from(StorageError::IoError))?;

    if rec.magic != MAGIC || rec.version != VERSION {
        return Err(StorageError::NotFound.into());
    }

    let expected_crc = rec.crc16;
    let mut zeroed = rec;
    zeroed.crc16 = 0;
    if crc16_ccitt(&encode(&zeroed)?) != expected_crc {
        return Err(StorageError::CrcMismatch.into());
    }
    Ok(rec)
}

/// Stamp magic/version, compute the CRC over the record with `crc16`
/// zeroed, then write the final record.
pub fn save(store: &mut impl DurableStorePort, addr: u16, mut rec: StorageRecord) -> Result<()> {
    rec.magic = MAGIC;
    rec.version = VERSION;
    rec.crc16 = 0;
    rec.crc16 = crc16_ccitt(&encode(&rec)?);
    store.write(addr, &encode(&rec)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;

    struct FakeStore {
        cells: RefCell<HashMap<u16, u8>>,
    }

    impl FakeStore {
        fn new() -> Self {
            Self {
                cells: RefCell::new(HashMap::new()),
            }
        }
    }

    impl DurableStorePort for FakeStore {
        fn total_size(&self) -> usize {
            512
        }
        fn read(&mut self, addr: u16, buf: &mut [u8]) -> Result<()> {
            let cells = self.cells.borrow();
            for (i, byte) in buf.iter_mut().enumerate() {
                *byte = *cells.get(&(addr + i as u16)).unwrap_or(&0);
            }
            Ok(())
        }
        fn write(&mut self, addr: u16, buf: &[u8]) -> Result<()> {
            let mut cells = self.cells.borrow_mut();
            for (i, byte) in buf.iter().enumerate() {
                cells.insert(addr + i as u16, *byte);
            }
            Ok(())
        }
    }

    #[test]
    fn round_trip_preserves_fields() {
        let mut store = FakeStore::new();
        let rec = StorageRecord::new(3, 123_456, 789, 2, true);
        save(&mut store, 0, rec).unwrap();
        let loaded = load(&mut store, 0).unwrap();
        assert_eq!(loaded.boot_count, 3);
        assert_eq!(loaded.last_alive_min, 123_456);
        assert_eq!(loaded.deficit_minutes, 789);
        assert_eq!(loaded.outage_count, 2);
        assert!(loaded.light_on);
    }

    #[test]
    fn first_boot_with_no_record_is_not_found() {
        let mut store = FakeStore::new();
        assert_eq!(load(&mut store, 0), Err(StorageError::NotFound.into()));
    }

    #[test]
    fn single_byte_corruption_is_detected() {
        let mut store = FakeStore::new();
        let rec = StorageRecord::new(1, 10, 0, 0, false);
        save(&mut store, 0, rec).unwrap();
        let mut cells = store.cells.borrow_mut();
        let byte = cells.entry(5).or_insert(0);
        *byte ^= 0xFF;
        drop(cells);
        assert_eq!(load(&mut store, 0), Err(StorageError::CrcMismatch.into()));
    }
}
