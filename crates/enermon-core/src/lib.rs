//! Hardware-independent core library for enermon
//!
//! This crate contains the platform-agnostic metering logic of the enermon
//! four-channel energy monitor: channel configuration, the energy accumulator,
//! calendar rollover detection, the persistence policy and record codecs, and
//! the sampling-cycle driver that ties them together.
//!
//! Everything hardware-facing (ADC, RMS routine, clocks, key/value store,
//! publication destination) is reached through traits, so the same core runs
//! on the device and on desktop hosts (for the simulator and tests).
//!
//! It is `#![no_std]` with `extern crate alloc`.

#![no_std]

extern crate alloc;

pub mod app_state;
pub mod config;
pub mod metrics;
pub mod sensors;
pub mod storage;
pub mod time;

pub use app_state::{CycleReport, DriverState, Meter, MeterError, PersistReason, TickOutcome};
pub use config::{CHANNEL_COUNT, ChannelConfig, ConfigError, MeterConfig, PinId, VoltageConfig};
pub use metrics::{MeterEvent, MetricId, MetricSink};
pub use sensors::{Measurement, SensorError, WaveformAdapter};
pub use storage::{EnergyWindow, KeyValueStore, MemoryStore, StoreError};
pub use time::{CalendarStamp, MonotonicClock, WallClock};
