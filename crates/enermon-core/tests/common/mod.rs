//! Host-side doubles shared by the integration tests

#![allow(dead_code)]

use std::cell::Cell;

use enermon_core::{
    ChannelConfig, Measurement, MeterConfig, MetricId, MetricSink, MonotonicClock, PinId,
    SensorError, VoltageConfig, WallClock, WaveformAdapter,
};

/// 2024-01-11T00:00:00Z, day 10 of 2024
pub const JAN_11_2024: i64 = 1_704_931_200;
pub const HOUR_MS: u32 = 3_600_000;

/// Manually advanced monotonic and wall clock
pub struct ManualClock {
    pub ms: Cell<u32>,
    pub unix: Cell<i64>,
}

impl ManualClock {
    pub fn new(ms: u32, unix: i64) -> Self {
        Self {
            ms: Cell::new(ms),
            unix: Cell::new(unix),
        }
    }

    /// Move both clocks forward; an unavailable wall clock stays unavailable
    pub fn advance(&self, ms: u32) {
        self.ms.set(self.ms.get().wrapping_add(ms));
        if self.unix.get() != 0 {
            self.unix.set(self.unix.get() + i64::from(ms / 1000));
        }
    }

    /// Move only the monotonic clock; the wall clock keeps its reading
    pub fn advance_monotonic(&self, ms: u32) {
        self.ms.set(self.ms.get().wrapping_add(ms));
    }
}

impl MonotonicClock for ManualClock {
    fn now_ms(&self) -> u32 {
        self.ms.get()
    }
}

impl WallClock for ManualClock {
    fn now_unix(&self) -> i64 {
        self.unix.get()
    }
}

/// Reports a fixed real power per pin
#[derive(Default)]
pub struct ScriptedAdapter {
    pub watts: [f32; 4],
    pub calls: Vec<PinId>,
}

impl ScriptedAdapter {
    pub fn uniform(watts: f32) -> Self {
        Self {
            watts: [watts; 4],
            calls: Vec::new(),
        }
    }
}

impl WaveformAdapter for ScriptedAdapter {
    fn measure(
        &mut self,
        channel: &ChannelConfig,
        voltage: &VoltageConfig,
    ) -> Result<Measurement, SensorError> {
        let pin = channel.pin.ok_or(SensorError::NotConfigured {
            sensor: "scripted channel",
        })?;
        self.calls.push(pin);
        // Pins 34..=37 map to channels 0..=3
        let watts = self.watts[usize::from(pin.0 - 34) % 4];
        Ok(Measurement::new(
            watts / voltage.calibration,
            voltage.calibration,
            watts,
        ))
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub published: Vec<(MetricId, f64)>,
}

impl RecordingSink {
    pub fn last(&self, metric: MetricId) -> Option<f64> {
        self.published
            .iter()
            .rev()
            .find(|(m, _)| *m == metric)
            .map(|(_, v)| *v)
    }
}

impl MetricSink for RecordingSink {
    fn publish(&mut self, metric: MetricId, value: f64) {
        self.published.push((metric, value));
    }
}

/// Configuration enabling the channels whose bit is set in `mask`
pub fn config_with_mask(mask: u8) -> MeterConfig {
    let mut config = MeterConfig::default();
    for index in 0..4 {
        if mask & (1 << index) != 0 {
            config = config
                .with_channel(index, PinId(34 + index as u8), 30.0)
                .expect("index in range");
        }
    }
    config
}
