//! Software RMS measurement from raw ADC bursts
//!
//! Reads `samples_per_cycle` interleaved current/voltage samples, removes the DC
//! bias of each burst, and derives RMS current, RMS voltage and real power.
//! The voltage samples are phase shifted towards the current samples by linear
//! interpolation between consecutive readings (`phase_correction` of 1.0 means
//! no shift).
//!
//! Without a voltage pin the configured voltage calibration is used as the
//! nominal line voltage and power is reported as `vrms * irms`.

use crate::config::{ChannelConfig, PinId, VoltageConfig};
use crate::sensors::{Measurement, SensorError, WaveformAdapter};

use alloc::vec::Vec;

/// Full scale reading of the 12-bit ADC
pub const ADC_MAX: f32 = 4095.0;
/// ADC reference voltage
pub const ADC_VREF: f32 = 3.3;

/// Raw access to the analog inputs
pub trait AdcReader {
    fn read_raw(&mut self, pin: PinId) -> Result<u16, SensorError>;
}

pub struct BurstRmsAdapter<R> {
    adc: R,
    current: Vec<f64>,
    voltage: Vec<f64>,
}

impl<R: AdcReader> BurstRmsAdapter<R> {
    pub fn new(adc: R) -> Self {
        Self {
            adc,
            current: Vec::new(),
            voltage: Vec::new(),
        }
    }

    pub fn adc(&self) -> &R {
        &self.adc
    }

    pub fn adc_mut(&mut self) -> &mut R {
        &mut self.adc
    }

    /// Fill the sample buffers with one burst
    fn capture(
        &mut self,
        current_pin: Option<PinId>,
        voltage_pin: Option<PinId>,
        count: u32,
    ) -> Result<(), SensorError> {
        self.current.clear();
        self.voltage.clear();

        for _ in 0..count {
            if let Some(pin) = current_pin {
                self.current.push(self.adc.read_raw(pin)? as f64);
            }
            if let Some(pin) = voltage_pin {
                self.voltage.push(self.adc.read_raw(pin)? as f64);
            }
        }

        Ok(())
    }
}

impl<R: AdcReader> WaveformAdapter for BurstRmsAdapter<R> {
    fn measure(
        &mut self,
        channel: &ChannelConfig,
        voltage: &VoltageConfig,
    ) -> Result<Measurement, SensorError> {
        let pin = channel.pin.ok_or(SensorError::NotConfigured {
            sensor: "current channel",
        })?;
        if voltage.samples_per_cycle == 0 {
            return Err(SensorError::NoSamples {
                sensor: "current channel",
            });
        }

        self.capture(Some(pin), voltage.pin, voltage.samples_per_cycle)?;
        remove_offset(&mut self.current);

        let i_ratio = counts_to_units(channel.calibration);
        let irms = i_ratio * rms(&self.current);

        let measurement = if voltage.pin.is_some() {
            remove_offset(&mut self.voltage);
            let v_ratio = counts_to_units(voltage.calibration);
            let vrms = v_ratio * rms(&self.voltage);
            let mean_product =
                phase_shifted_mean_product(&self.voltage, &self.current, voltage.phase_correction);

            Measurement::new(
                irms as f32,
                vrms as f32,
                (v_ratio * i_ratio * mean_product) as f32,
            )
        } else {
            let vrms = voltage.calibration as f64;
            Measurement::new(irms as f32, vrms as f32, (vrms * irms) as f32)
        };

        if !measurement.is_finite() {
            return Err(SensorError::InvalidReading {
                sensor: "current channel",
            });
        }

        Ok(measurement)
    }

    fn measure_voltage(&mut self, voltage: &VoltageConfig) -> Option<Result<f32, SensorError>> {
        let pin = voltage.pin?;
        if voltage.samples_per_cycle == 0 {
            return Some(Err(SensorError::NoSamples {
                sensor: "voltage channel",
            }));
        }

        if let Err(e) = self.capture(None, Some(pin), voltage.samples_per_cycle) {
            return Some(Err(e));
        }
        remove_offset(&mut self.voltage);

        let vrms = (counts_to_units(voltage.calibration) * rms(&self.voltage)) as f32;
        if vrms.is_finite() {
            Some(Ok(vrms))
        } else {
            Some(Err(SensorError::InvalidReading {
                sensor: "voltage channel",
            }))
        }
    }
}

/// Scale factor from ADC counts to calibrated units
fn counts_to_units(calibration: f32) -> f64 {
    calibration as f64 * (ADC_VREF as f64 / ADC_MAX as f64)
}

fn remove_offset(samples: &mut [f64]) {
    if samples.is_empty() {
        return;
    }
    let mean = samples.iter().sum::<f64>() / samples.len() as f64;
    for sample in samples.iter_mut() {
        *sample -= mean;
    }
}

fn rms(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples.iter().map(|s| s * s).sum();
    libm::sqrt(sum_sq / samples.len() as f64)
}

fn phase_shifted_mean_product(voltage: &[f64], current: &[f64], phase_correction: f32) -> f64 {
    let count = voltage.len().min(current.len());
    if count == 0 {
        return 0.0;
    }

    let phase = phase_correction as f64;
    let mut sum = 0.0;
    let mut previous_v = voltage[0];
    for (v, i) in voltage.iter().zip(current.iter()) {
        let shifted_v = previous_v + phase * (v - previous_v);
        sum += shifted_v * i;
        previous_v = *v;
    }

    sum / count as f64
}
