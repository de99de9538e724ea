//! Sampling-cycle driver state and error types

mod meter;

pub use meter::Meter;

use core::fmt;

use thiserror_no_std::Error;

use crate::config::{CHANNEL_COUNT, ConfigError};
use crate::storage::{ChannelOutcome, RolloverCheck, StoreError};

/// Driver state machine. There is no terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// Waiting for the next sampling period
    Idle,
    /// A cycle is in progress; further ticks are ignored
    Measuring,
}

/// Why meter state was written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistReason {
    /// A calendar window was reset or the boundaries were first established
    Boundary,
    /// The flush interval elapsed
    Interval,
    /// Requested by the host through [`Meter::flush`]
    Requested,
}

impl fmt::Display for PersistReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Boundary => "boundary",
            Self::Interval => "interval",
            Self::Requested => "requested",
        })
    }
}

/// Everything one completed cycle did
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    /// Time integrated into the energy totals
    pub elapsed_hours: f64,
    pub rollover: RolloverCheck,
    /// Set when a flush was attempted this cycle
    pub persisted: Option<PersistReason>,
    /// Error of the flush attempt; in-memory state stays authoritative
    pub save_error: Option<StoreError>,
    pub outcomes: [ChannelOutcome; CHANNEL_COUNT],
}

/// Result of [`Meter::tick`]
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// The sampling period has not elapsed since the previous cycle
    NotDue,
    /// A cycle is already in progress
    Busy,
    /// First cycle: only the time baseline was recorded
    Baseline,
    Completed(CycleReport),
}

impl TickOutcome {
    pub fn report(&self) -> Option<&CycleReport> {
        match self {
            Self::Completed(report) => Some(report),
            _ => None,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MeterError {
    #[error("Configuration rejected: {0}")]
    Config(ConfigError),
    #[error("Store error: {0}")]
    Store(StoreError),
}

impl From<ConfigError> for MeterError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<StoreError> for MeterError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}
