//! Durable store adapter — implements [`DurableStorePort`] (§6 "Durable
//! store") over a byte-addressed EEPROM-shaped region.
//!
//! Grounded on `adapters/nvs.rs`'s dual-target split: on ESP-IDF the
//! region lives inside one NVS blob under a fixed key (flash-backed,
//! wear-levelled by the NVS driver itself), loaded and rewritten whole on
//! every `read`/`write`; the host-simulation backend is a plain
//! `RefCell<HashMap<u16, u8>>`, matching the pack's "HashMap-backed,
//! `RefCell`-guarded" simulation idiom.

use crate::error::{Error, Result, StorageError};
use crate::ports::DurableStorePort;
use log::warn;

#[cfg(not(target_os = "espidf"))]
use std::cell::RefCell;
#[cfg(not(target_os = "espidf"))]
use std::collections::HashMap;

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

const NAMESPACE: &str = "hydro";
const KEY: &[u8] = b"eeprom\0";

pub struct EepromAdapter {
    total_size: usize,
    #[cfg(not(target_os = "espidf"))]
    cells: RefCell<HashMap<u16, u8>>,
}

impl EepromAdapter {
    #[must_use]
    pub fn new(total_size: usize) -> Self {
        Self {
            total_size,
            #[cfg(not(target_os = "espidf"))]
            cells: RefCell::new(HashMap::new()),
        }
    }

    #[cfg(target_os = "espidf")]
    fn with_nvs_handle<F, T>(write: bool, f: F) -> core::result::Result<T, i32>
    where
        F: FnOnce(nvs_handle_t) -> core::result::Result<T, i32>,
    {
        let mut ns_buf = [0u8; 16];
        let ns_bytes = NAMESPACE.as_bytes();
        let len = ns_bytes.len().min(15);
        ns_buf[..len].copy_from_slice(&ns_bytes[..len]);

        let mut handle: nvs_handle_t = 0;
        let mode = if write {
            nvs_open_mode_t_NVS_READWRITE
        } else {
            nvs_open_mode_t_NVS_READONLY
        };
        let ret = unsafe { nvs_open(ns_buf.as_ptr().cast(), mode, &mut handle) };
        if ret != ESP_OK {
            return Err(ret);
        }
        let result = f(handle);
        unsafe { nvs_close(handle) };
        result
    }

    #[cfg(target_os = "espidf")]
    fn load_blob(&self) -> Vec<u8> {
        let result = Self::with_nvs_handle(false, |handle| {
            let mut size: usize = 0;
            let ret = unsafe {
                nvs_get_blob(handle, KEY.as_ptr().cast(), core::ptr::null_mut(), &mut size)
            };
            if ret == ESP_ERR_NVS_NOT_FOUND || size == 0 {
                return Ok(Vec::new());
            }
            if ret != ESP_OK {
                return Err(ret);
            }
            let mut buf = vec![0u8; size];
            let ret =
                unsafe { nvs_get_blob(handle, KEY.as_ptr().cast(), buf.as_mut_ptr().cast(), &mut size) };
            if ret != ESP_OK {
                return Err(ret);
            }
            Ok(buf)
        });
        result.unwrap_or_default()
    }

    #[cfg(target_os = "espidf")]
    fn store_blob(&self, blob: &[u8]) -> core::result::Result<(), i32> {
        Self::with_nvs_handle(true, |handle| {
            let ret = unsafe {
                nvs_set_blob(handle, KEY.as_ptr().cast(), blob.as_ptr().cast(), blob.len())
            };
            if ret != ESP_OK {
                return Err(ret);
            }
            let ret = unsafe { nvs_commit(handle) };
            if ret != ESP_OK {
                return Err(ret);
            }
            Ok(())
        })
    }
}

impl DurableStorePort for EepromAdapter {
    fn total_size(&self) -> usize {
        self.total_size
    }

    fn read(&mut self, addr: u16, buf: &mut [u8]) -> Result<()> {
        let end = addr as usize + buf.len();
        if end > self.total_size {
            return Err(StorageError::OutOfRange.into());
        }

        #[cfg(not(target_os = "espidf"))]
        {
            let cells = self.cells.borrow();
            for (i, byte) in buf.iter_mut().enumerate() {
                *byte = *cells.get(&(addr + i as u16)).unwrap_or(&0);
            }
            Ok(())
        }

        #[cfg(target_os = "espidf")]
        {
            let blob = self.load_blob();
            for (i, byte) in buf.iter_mut().enumerate() {
                *byte = blob.get(addr as usize + i).copied().unwrap_or(0);
            }
            Ok(())
        }
    }

    fn write(&mut self, addr: u16, buf: &[u8]) -> Result<()> {
        let end = addr as usize + buf.len();
        if end > self.total_size {
            return Err(StorageError::OutOfRange.into());
        }

        #[cfg(not(target_os = "espidf"))]
        {
            let mut cells = self.cells.borrow_mut();
            for (i, &byte) in buf.iter().enumerate() {
                cells.insert(addr + i as u16, byte);
            }
            Ok(())
        }

        #[cfg(target_os = "espidf")]
        {
            let mut blob = self.load_blob();
            if blob.len() < end {
                blob.resize(end, 0);
            }
            blob[addr as usize..end].copy_from_slice(buf);
            self.store_blob(&blob).map_err(|e| {
                warn!("EepromAdapter: NVS write error {e}");
                Error::from(StorageError::IoError)
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_within_bounds() {
        let mut store = EepromAdapter::new(64);
        store.write(4, &[1, 2, 3]).unwrap();
        let mut buf = [0u8; 3];
        store.read(4, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3]);
    }

    #[test]
    fn rejects_out_of_range_access() {
        let mut store = EepromAdapter::new(8);
        assert_eq!(
            store.write(6, &[1, 2, 3]),
            Err(StorageError::OutOfRange.into())
        );
    }

    #[test]
    fn unwritten_bytes_read_as_zero() {
        let mut store = EepromAdapter::new(16);
        let mut buf = [0xFFu8; 4];
        store.read(0, &mut buf).unwrap();
        assert_eq!(buf, [0, 0, 0, 0]);
    }
}
