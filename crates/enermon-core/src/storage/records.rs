//! Persisted record formats.
//!
//! Both records are fixed size, little-endian and start with a 4 byte magic tag
//! and a layout version. Decoding validates every field; a record written by a
//! different layout, channel count or channel set is rejected and the caller
//! treats it as missing.
//!
//! EnergyRecord (104 bytes):
//! - magic: 4 bytes (`EMEN`)
//! - version: 1 byte
//! - channel_count: 1 byte
//! - enabled_mask: 1 byte
//! - reserved: 1 byte
//! - totals: 96 bytes (4 channels × [daily, weekly, monthly] × f64)
//!
//! BoundaryRecord (24 bytes):
//! - magic: 4 bytes (`EMBD`)
//! - version: 1 byte
//! - reserved: 3 bytes
//! - day_year: 4 bytes (i32)
//! - day_of_year: 2 bytes (u16)
//! - month: 1 byte
//! - reserved: 1 byte
//! - week_bucket: 4 bytes (i32)
//! - month_year: 4 bytes (i32)

use crate::config::CHANNEL_COUNT;
use crate::storage::EnergyWindow;
use crate::storage::rollover::{BoundarySet, DayBoundary, MonthBoundary};
use thiserror_no_std::Error;

pub const ENERGY_RECORD_MAGIC: [u8; 4] = *b"EMEN";
pub const BOUNDARY_RECORD_MAGIC: [u8; 4] = *b"EMBD";

/// Bump whenever either layout changes
pub const RECORD_VERSION: u8 = 1;

const WINDOW_COUNT: usize = EnergyWindow::ALL.len();
const HEADER_SIZE: usize = 8;

pub const ENERGY_RECORD_SIZE: usize = HEADER_SIZE + CHANNEL_COUNT * WINDOW_COUNT * 8;
pub const BOUNDARY_RECORD_SIZE: usize = 24;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordError {
    #[error("Record is {actual} bytes, expected {expected}")]
    WrongLength { expected: usize, actual: usize },
    #[error("Record magic does not match")]
    BadMagic,
    #[error("Record version {found} is not supported")]
    UnsupportedVersion { found: u8 },
    #[error("Record holds {found} channels")]
    ChannelCountMismatch { found: u8 },
    #[error("Record channel set {found:#06b} differs from configured {expected:#06b}")]
    ChannelSetMismatch { found: u8, expected: u8 },
    #[error("Record value for channel {channel} is not finite")]
    NonFiniteValue { channel: usize },
    #[error("Record field {field} is out of range")]
    InvalidField { field: &'static str },
}

/// Energy totals of every channel and window, in watt-hours
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EnergyTotals {
    pub wh: [[f64; WINDOW_COUNT]; CHANNEL_COUNT],
}

impl EnergyTotals {
    pub const fn get(&self, channel: usize, window: EnergyWindow) -> f64 {
        self.wh[channel][window.index()]
    }
}

/// Energy totals tagged with the channel set they were accumulated for
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnergyRecord {
    pub enabled_mask: u8,
    pub totals: EnergyTotals,
}

impl EnergyRecord {
    pub const fn new(enabled_mask: u8, totals: EnergyTotals) -> Self {
        Self {
            enabled_mask,
            totals,
        }
    }

    pub fn to_bytes(&self) -> [u8; ENERGY_RECORD_SIZE] {
        let mut bytes = [0u8; ENERGY_RECORD_SIZE];

        bytes[0..4].copy_from_slice(&ENERGY_RECORD_MAGIC);
        bytes[4] = RECORD_VERSION;
        bytes[5] = CHANNEL_COUNT as u8;
        bytes[6] = self.enabled_mask;

        let mut offset = HEADER_SIZE;
        for channel in &self.totals.wh {
            for &value in channel {
                bytes[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
                offset += 8;
            }
        }

        bytes
    }

    /// Decode and validate against the currently configured channel set
    pub fn from_bytes(bytes: &[u8], expected_mask: u8) -> Result<Self, RecordError> {
        check_header(bytes, ENERGY_RECORD_SIZE, ENERGY_RECORD_MAGIC)?;

        if bytes[5] as usize != CHANNEL_COUNT {
            return Err(RecordError::ChannelCountMismatch { found: bytes[5] });
        }
        let enabled_mask = bytes[6];
        if enabled_mask != expected_mask {
            return Err(RecordError::ChannelSetMismatch {
                found: enabled_mask,
                expected: expected_mask,
            });
        }

        let mut totals = EnergyTotals::default();
        let mut offset = HEADER_SIZE;
        for (channel, windows) in totals.wh.iter_mut().enumerate() {
            for value in windows.iter_mut() {
                *value = read_f64(bytes, offset);
                offset += 8;
                if !value.is_finite() {
                    return Err(RecordError::NonFiniteValue { channel });
                }
            }
        }

        Ok(Self {
            enabled_mask,
            totals,
        })
    }
}

/// Calendar boundary identities
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundaryRecord {
    pub bounds: BoundarySet,
}

impl BoundaryRecord {
    pub const fn new(bounds: BoundarySet) -> Self {
        Self { bounds }
    }

    pub fn to_bytes(&self) -> [u8; BOUNDARY_RECORD_SIZE] {
        let mut bytes = [0u8; BOUNDARY_RECORD_SIZE];
        let bounds = &self.bounds;

        bytes[0..4].copy_from_slice(&BOUNDARY_RECORD_MAGIC);
        bytes[4] = RECORD_VERSION;
        bytes[8..12].copy_from_slice(&bounds.day.year.to_le_bytes());
        bytes[12..14].copy_from_slice(&bounds.day.day_of_year.to_le_bytes());
        bytes[14] = bounds.month.month;
        bytes[16..20].copy_from_slice(&bounds.week.to_le_bytes());
        bytes[20..24].copy_from_slice(&bounds.month.year.to_le_bytes());

        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RecordError> {
        check_header(bytes, BOUNDARY_RECORD_SIZE, BOUNDARY_RECORD_MAGIC)?;

        let day_year = read_i32(bytes, 8);
        let day_of_year = u16::from_le_bytes([bytes[12], bytes[13]]);
        let month = bytes[14];
        let week = read_i32(bytes, 16);
        let month_year = read_i32(bytes, 20);

        if day_of_year > 365 {
            return Err(RecordError::InvalidField {
                field: "day_of_year",
            });
        }
        if !(1..=12).contains(&month) {
            return Err(RecordError::InvalidField { field: "month" });
        }

        Ok(Self {
            bounds: BoundarySet {
                day: DayBoundary {
                    year: day_year,
                    day_of_year,
                },
                week,
                month: MonthBoundary {
                    year: month_year,
                    month,
                },
            },
        })
    }
}

fn check_header(bytes: &[u8], expected: usize, magic: [u8; 4]) -> Result<(), RecordError> {
    if bytes.len() != expected {
        return Err(RecordError::WrongLength {
            expected,
            actual: bytes.len(),
        });
    }
    if bytes[0..4] != magic {
        return Err(RecordError::BadMagic);
    }
    if bytes[4] != RECORD_VERSION {
        return Err(RecordError::UnsupportedVersion { found: bytes[4] });
    }
    Ok(())
}

fn read_f64(bytes: &[u8], offset: usize) -> f64 {
    let mut value_bytes = [0u8; 8];
    value_bytes.copy_from_slice(&bytes[offset..offset + 8]);
    f64::from_le_bytes(value_bytes)
}

fn read_i32(bytes: &[u8], offset: usize) -> i32 {
    let mut value_bytes = [0u8; 4];
    value_bytes.copy_from_slice(&bytes[offset..offset + 4]);
    i32::from_le_bytes(value_bytes)
}
