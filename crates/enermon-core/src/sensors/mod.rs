mod burst_rms;

pub use burst_rms::{ADC_MAX, ADC_VREF, AdcReader, BurstRmsAdapter};

use crate::config::{ChannelConfig, VoltageConfig};
use thiserror_no_std::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    #[error("{sensor} is not configured")]
    NotConfigured { sensor: &'static str },
    #[error("Failed to read {sensor} on pin {pin}: {details}")]
    ReadFailed {
        sensor: &'static str,
        pin: u8,
        details: &'static str,
    },
    #[error("{sensor} produced no samples")]
    NoSamples { sensor: &'static str },
    #[error("{sensor} reading is not a finite number")]
    InvalidReading { sensor: &'static str },
}

/// One RMS measurement of a current channel against the shared voltage
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Measurement {
    /// RMS current in amps
    pub irms: f32,
    /// RMS voltage in volts
    pub vrms: f32,
    /// Signed real power in watts, negative when exporting
    pub real_power: f32,
}

impl Measurement {
    pub const fn new(irms: f32, vrms: f32, real_power: f32) -> Self {
        Self {
            irms,
            vrms,
            real_power,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.irms.is_finite() && self.vrms.is_finite() && self.real_power.is_finite()
    }
}

/// Produces RMS measurements for a channel.
///
/// Called once per enabled channel per sampling cycle. A call may block for one
/// sampling burst and is treated as a single atomic step.
pub trait WaveformAdapter {
    fn measure(
        &mut self,
        channel: &ChannelConfig,
        voltage: &VoltageConfig,
    ) -> Result<Measurement, SensorError>;

    /// Dedicated voltage-only measurement.
    ///
    /// Adapters that cannot measure voltage on its own return `None`, in which
    /// case the meter reports the voltage seen by the latest channel measurement.
    fn measure_voltage(&mut self, voltage: &VoltageConfig) -> Option<Result<f32, SensorError>> {
        let _ = voltage;
        None
    }
}

impl<A: WaveformAdapter + ?Sized> WaveformAdapter for &mut A {
    fn measure(
        &mut self,
        channel: &ChannelConfig,
        voltage: &VoltageConfig,
    ) -> Result<Measurement, SensorError> {
        (**self).measure(channel, voltage)
    }

    fn measure_voltage(&mut self, voltage: &VoltageConfig) -> Option<Result<f32, SensorError>> {
        (**self).measure_voltage(voltage)
    }
}
