//! Persistence of meter state through a key/value store
//!
//! The [`PersistenceGateway`] owns *when* state is written and *what* must hold
//! when it is read back. The store itself only moves bytes.
//!
//! ## Keys
//!
//! - [`ENERGY_KEY`]: one [`EnergyRecord`] holding every channel and window
//! - [`BOUNDS_KEY`]: one [`BoundaryRecord`] with the calendar identities
//! - [`CONFIG_KEY`]: the postcard encoded [`MeterConfig`], written by hosts only

use log::{debug, info, warn};
use thiserror_no_std::Error;

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use super::records::{BoundaryRecord, EnergyRecord, EnergyTotals};
use super::rollover::BoundarySet;
use crate::config::MeterConfig;
use crate::time::elapsed_ms;

pub const ENERGY_KEY: &str = "energy";
pub const BOUNDS_KEY: &str = "bounds";
pub const CONFIG_KEY: &str = "config";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Storage backend failed: {0}")]
    Backend(heapless::String<64>),
    #[error("Storage is unavailable")]
    Unavailable,
    #[error("Value could not be encoded")]
    Encoding,
}

impl StoreError {
    /// Backend error with a message, truncated to fit
    pub fn backend(details: &str) -> Self {
        let mut message = heapless::String::new();
        for c in details.chars() {
            if message.push(c).is_err() {
                break;
            }
        }
        Self::Backend(message)
    }
}

/// Byte-oriented persistent storage
pub trait KeyValueStore {
    fn save(&mut self, key: &str, bytes: &[u8]) -> Result<(), StoreError>;

    /// `Ok(None)` when nothing was ever saved under `key`
    fn load(&mut self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
}

impl<K: KeyValueStore + ?Sized> KeyValueStore for &mut K {
    fn save(&mut self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        (**self).save(key, bytes)
    }

    fn load(&mut self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        (**self).load(key)
    }
}

/// In-memory store for hosts without flash, and for tests
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: BTreeMap<String, Vec<u8>>,
    saves: usize,
    fail_saves: bool,
    fail_loads: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `save` calls
    pub const fn save_count(&self) -> usize {
        self.saves
    }

    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    pub fn insert(&mut self, key: &str, bytes: &[u8]) {
        self.entries.insert(key.to_string(), bytes.to_vec());
    }

    /// Make every following `save` fail with [`StoreError::Unavailable`]
    pub fn set_fail_saves(&mut self, fail: bool) {
        self.fail_saves = fail;
    }

    /// Make every following `load` fail with [`StoreError::Unavailable`]
    pub fn set_fail_loads(&mut self, fail: bool) {
        self.fail_loads = fail;
    }
}

impl KeyValueStore for MemoryStore {
    fn save(&mut self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        if self.fail_saves {
            return Err(StoreError::Unavailable);
        }
        self.insert(key, bytes);
        self.saves += 1;
        Ok(())
    }

    fn load(&mut self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        if self.fail_loads {
            return Err(StoreError::Unavailable);
        }
        Ok(self.entries.get(key).cloned())
    }
}

/// State recovered at startup. A field is `None` when its record was missing,
/// unreadable or invalid.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Restored {
    pub totals: Option<EnergyTotals>,
    pub bounds: Option<BoundarySet>,
}

/// Decides when meter state is flushed and validates it on reload
pub struct PersistenceGateway<K> {
    store: K,
    interval_ms: u32,
    /// Channel set the energy record must match
    enabled_mask: u8,
    /// Monotonic time of the last flush attempt
    last_persist_ms: Option<u32>,
}

impl<K: KeyValueStore> PersistenceGateway<K> {
    pub fn new(store: K, config: &MeterConfig) -> Self {
        Self {
            store,
            interval_ms: config.persist_interval_ms,
            enabled_mask: config.enabled_mask(),
            last_persist_ms: None,
        }
    }

    pub fn store(&self) -> &K {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut K {
        &mut self.store
    }

    pub const fn last_persist_ms(&self) -> Option<u32> {
        self.last_persist_ms
    }

    /// Load the energy and boundary records
    pub fn restore(&mut self) -> Restored {
        let totals = self.load_record(ENERGY_KEY).and_then(|bytes| {
            match EnergyRecord::from_bytes(&bytes, self.enabled_mask) {
                Ok(record) => Some(record.totals),
                Err(e) => {
                    warn!("Discarding energy record: {}", e);
                    None
                }
            }
        });
        let bounds = self.load_record(BOUNDS_KEY).and_then(|bytes| {
            match BoundaryRecord::from_bytes(&bytes) {
                Ok(record) => Some(record.bounds),
                Err(e) => {
                    warn!("Discarding boundary record: {}", e);
                    None
                }
            }
        });

        match (&totals, &bounds) {
            (Some(_), Some(_)) => info!("Restored energy totals and calendar boundaries"),
            (Some(_), None) => info!("Restored energy totals, calendar boundaries start fresh"),
            (None, Some(_)) => info!("Restored calendar boundaries, energy totals start at zero"),
            (None, None) => info!("No prior meter state, starting from zero"),
        }

        Restored { totals, bounds }
    }

    fn load_record(&mut self, key: &str) -> Option<Vec<u8>> {
        match self.store.load(key) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Failed to load {}: {}", key, e);
                None
            }
        }
    }

    /// Start the flush interval at `now_ms` unless it is already running
    pub fn mark_baseline(&mut self, now_ms: u32) {
        if self.last_persist_ms.is_none() {
            self.last_persist_ms = Some(now_ms);
        }
    }

    /// Whether a full interval has passed since the last flush attempt
    pub fn interval_due(&self, now_ms: u32) -> bool {
        self.last_persist_ms
            .is_some_and(|last| elapsed_ms(now_ms, last) >= self.interval_ms)
    }

    /// Write the energy totals, then the boundary identities when known.
    ///
    /// The interval restarts whether or not the write succeeds.
    pub fn persist(
        &mut self,
        now_ms: u32,
        totals: &EnergyTotals,
        bounds: Option<BoundarySet>,
    ) -> Result<(), StoreError> {
        self.last_persist_ms = Some(now_ms);

        let record = EnergyRecord::new(self.enabled_mask, *totals);
        self.store.save(ENERGY_KEY, &record.to_bytes())?;

        if let Some(bounds) = bounds {
            self.store
                .save(BOUNDS_KEY, &BoundaryRecord::new(bounds).to_bytes())?;
        }

        debug!("Meter state persisted at {} ms", now_ms);
        Ok(())
    }

    pub fn save_config(&mut self, config: &MeterConfig) -> Result<(), StoreError> {
        let bytes = config.to_bytes().map_err(|_| StoreError::Encoding)?;
        self.store.save(CONFIG_KEY, &bytes)
    }

    /// Load a stored configuration. An undecodable or invalid one is reported
    /// as missing.
    pub fn load_config(&mut self) -> Result<Option<MeterConfig>, StoreError> {
        let Some(bytes) = self.store.load(CONFIG_KEY)? else {
            return Ok(None);
        };

        match MeterConfig::from_bytes(&bytes) {
            Ok(config) => Ok(Some(config)),
            Err(e) => {
                warn!("Ignoring stored configuration: {}", e);
                Ok(None)
            }
        }
    }
}
