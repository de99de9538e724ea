//! Meter configuration
//!
//! Static description of the (up to) four current-transformer channels and the
//! shared voltage channel. A channel without a pin is disabled and takes no part
//! in measurement, accumulation or publication.
//!
//! The configuration is `serde` serializable and round-trips through `postcard`
//! so a host can keep it in the same key/value store as the meter state.

use core::fmt::Write;

use embassy_time::Duration;
use heapless::String;
use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

use alloc::vec::Vec;

/// Number of current channels the meter tracks
pub const CHANNEL_COUNT: usize = 4;

/// Maximum length of a user supplied channel name
pub const CHANNEL_NAME_LEN: usize = 16;

/// Default CT calibration (amps per unit of ADC-referred voltage)
pub const DEFAULT_CT_CALIBRATION: f32 = 1111.0;
/// Default voltage calibration, also the nominal line voltage
pub const DEFAULT_VOLTAGE_CALIBRATION: f32 = 230.0;
/// Default voltage phase correction factor
pub const DEFAULT_PHASE_CORRECTION: f32 = 1.7;
/// Default number of samples taken per measurement burst
pub const DEFAULT_SAMPLES_PER_CYCLE: u32 = 200;
/// Default minimum time between two sampling cycles
pub const DEFAULT_SAMPLE_PERIOD_MS: u32 = 200;
/// Default interval between two unconditional state flushes (5 minutes)
pub const DEFAULT_PERSIST_INTERVAL_MS: u32 = 5 * 60 * 1000;

/// Largest accepted timezone offset, exclusive (one day)
const MAX_UTC_OFFSET_SECS: u32 = 24 * 60 * 60;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Channel index {index} out of range (meter has {max} channels)")]
    ChannelOutOfRange { index: usize, max: usize },
    #[error("Channel {index} calibration {value} is not a positive finite number")]
    InvalidChannelCalibration { index: usize, value: f32 },
    #[error("Voltage {field} {value} is not a valid number")]
    InvalidVoltage { field: &'static str, value: f32 },
    #[error("Samples per cycle must be positive")]
    ZeroSampleCount,
    #[error("Sampling period must be positive")]
    ZeroSamplePeriod,
    #[error("Persist interval must be positive")]
    ZeroPersistInterval,
    #[error("UTC offset {offset}s is out of range")]
    InvalidUtcOffset { offset: i32 },
    #[error("Channel name longer than {max} bytes")]
    NameTooLong { max: usize },
    #[error("Config encoding failed: {0}")]
    Encoding(postcard::Error),
}

/// Identity of an analog input pin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PinId(pub u8);

/// One current-transformer channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Input pin, `None` disables the channel
    pub pin: Option<PinId>,
    /// CT calibration constant
    pub calibration: f32,
    /// Optional human readable name used for metric labels
    pub name: Option<String<CHANNEL_NAME_LEN>>,
}

impl ChannelConfig {
    /// A disabled channel carrying the default calibration
    pub const fn disabled() -> Self {
        Self {
            pin: None,
            calibration: DEFAULT_CT_CALIBRATION,
            name: None,
        }
    }

    pub const fn new(pin: PinId, calibration: f32) -> Self {
        Self {
            pin: Some(pin),
            calibration,
            name: None,
        }
    }

    /// Attach a display name to the channel
    pub fn with_name(mut self, name: &str) -> Result<Self, ConfigError> {
        let name = String::try_from(name).map_err(|_| ConfigError::NameTooLong {
            max: CHANNEL_NAME_LEN,
        })?;
        self.name = Some(name);
        Ok(self)
    }

    pub const fn is_enabled(&self) -> bool {
        self.pin.is_some()
    }

    /// Name used in metric labels: the configured name or `CT<index>`
    pub fn display_name(&self, index: usize) -> String<CHANNEL_NAME_LEN> {
        match &self.name {
            Some(name) => name.clone(),
            None => {
                let mut fallback = String::new();
                let _ = write!(fallback, "CT{}", index);
                fallback
            }
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Shared voltage channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoltageConfig {
    /// Input pin, `None` means no voltage sensing (nominal voltage is assumed)
    pub pin: Option<PinId>,
    /// Voltage calibration constant
    pub calibration: f32,
    /// Phase correction between voltage and current samples
    pub phase_correction: f32,
    /// Samples taken per measurement burst
    pub samples_per_cycle: u32,
}

impl Default for VoltageConfig {
    fn default() -> Self {
        Self {
            pin: None,
            calibration: DEFAULT_VOLTAGE_CALIBRATION,
            phase_correction: DEFAULT_PHASE_CORRECTION,
            samples_per_cycle: DEFAULT_SAMPLES_PER_CYCLE,
        }
    }
}

/// Complete meter configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeterConfig {
    pub channels: [ChannelConfig; CHANNEL_COUNT],
    pub voltage: VoltageConfig,
    /// Minimum monotonic time between two sampling cycles
    pub sample_period_ms: u32,
    /// Interval between two unconditional state flushes
    pub persist_interval_ms: u32,
    /// Local timezone offset used for calendar boundaries
    pub utc_offset_secs: i32,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            channels: [
                ChannelConfig::disabled(),
                ChannelConfig::disabled(),
                ChannelConfig::disabled(),
                ChannelConfig::disabled(),
            ],
            voltage: VoltageConfig::default(),
            sample_period_ms: DEFAULT_SAMPLE_PERIOD_MS,
            persist_interval_ms: DEFAULT_PERSIST_INTERVAL_MS,
            utc_offset_secs: 0,
        }
    }
}

impl MeterConfig {
    /// Enable channel `index` on `pin` with the given calibration
    pub fn with_channel(
        mut self,
        index: usize,
        pin: PinId,
        calibration: f32,
    ) -> Result<Self, ConfigError> {
        let channel = self
            .channels
            .get_mut(index)
            .ok_or(ConfigError::ChannelOutOfRange {
                index,
                max: CHANNEL_COUNT,
            })?;
        channel.pin = Some(pin);
        channel.calibration = calibration;
        Ok(self)
    }

    pub fn with_voltage(
        mut self,
        pin: Option<PinId>,
        calibration: f32,
        phase_correction: f32,
        samples_per_cycle: u32,
    ) -> Self {
        self.voltage = VoltageConfig {
            pin,
            calibration,
            phase_correction,
            samples_per_cycle,
        };
        self
    }

    pub const fn sample_period(&self) -> Duration {
        Duration::from_millis(self.sample_period_ms as u64)
    }

    pub const fn persist_interval(&self) -> Duration {
        Duration::from_millis(self.persist_interval_ms as u64)
    }

    /// Bit `i` is set when channel `i` is enabled
    pub fn enabled_mask(&self) -> u8 {
        self.channels
            .iter()
            .enumerate()
            .filter(|(_, channel)| channel.is_enabled())
            .fold(0u8, |mask, (i, _)| mask | (1 << i))
    }

    /// Iterate over `(index, channel)` for every enabled channel
    pub fn enabled_channels(&self) -> impl Iterator<Item = (usize, &ChannelConfig)> {
        self.channels
            .iter()
            .enumerate()
            .filter(|(_, channel)| channel.is_enabled())
    }

    /// Check every value the metering core relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (index, channel) in self.enabled_channels() {
            if !is_positive_finite(channel.calibration) {
                return Err(ConfigError::InvalidChannelCalibration {
                    index,
                    value: channel.calibration,
                });
            }
        }

        if !is_positive_finite(self.voltage.calibration) {
            return Err(ConfigError::InvalidVoltage {
                field: "calibration",
                value: self.voltage.calibration,
            });
        }
        if !self.voltage.phase_correction.is_finite() {
            return Err(ConfigError::InvalidVoltage {
                field: "phase correction",
                value: self.voltage.phase_correction,
            });
        }
        if self.voltage.samples_per_cycle == 0 {
            return Err(ConfigError::ZeroSampleCount);
        }
        if self.sample_period_ms == 0 {
            return Err(ConfigError::ZeroSamplePeriod);
        }
        if self.persist_interval_ms == 0 {
            return Err(ConfigError::ZeroPersistInterval);
        }
        if self.utc_offset_secs.unsigned_abs() >= MAX_UTC_OFFSET_SECS {
            return Err(ConfigError::InvalidUtcOffset {
                offset: self.utc_offset_secs,
            });
        }

        Ok(())
    }

    /// Encode with postcard
    pub fn to_bytes(&self) -> Result<Vec<u8>, ConfigError> {
        postcard::to_allocvec(self).map_err(ConfigError::Encoding)
    }

    /// Decode with postcard and validate the result
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ConfigError> {
        let config: Self = postcard::from_bytes(bytes).map_err(ConfigError::Encoding)?;
        config.validate()?;
        Ok(config)
    }
}

fn is_positive_finite(value: f32) -> bool {
    value.is_finite() && value > 0.0
}
