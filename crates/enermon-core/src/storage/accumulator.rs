use log::{debug, warn};

use super::EnergyWindow;
use super::records::EnergyTotals;
use crate::config::{CHANNEL_COUNT, MeterConfig};
use crate::metrics::{MetricId, MetricSink};
use crate::sensors::{SensorError, WaveformAdapter};
use crate::time::{elapsed_ms, ms_to_hours};

/// Live values of one current channel
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChannelState {
    /// Most recent RMS current (A)
    pub last_irms: f32,
    /// Most recent real power (W), signed
    pub last_power_w: f32,
    pub energy_daily_wh: f64,
    pub energy_weekly_wh: f64,
    pub energy_monthly_wh: f64,
}

impl ChannelState {
    pub const fn zeroed() -> Self {
        Self {
            last_irms: 0.0,
            last_power_w: 0.0,
            energy_daily_wh: 0.0,
            energy_weekly_wh: 0.0,
            energy_monthly_wh: 0.0,
        }
    }

    pub const fn energy(&self, window: EnergyWindow) -> f64 {
        match window {
            EnergyWindow::Daily => self.energy_daily_wh,
            EnergyWindow::Weekly => self.energy_weekly_wh,
            EnergyWindow::Monthly => self.energy_monthly_wh,
        }
    }

    fn energy_mut(&mut self, window: EnergyWindow) -> &mut f64 {
        match window {
            EnergyWindow::Daily => &mut self.energy_daily_wh,
            EnergyWindow::Weekly => &mut self.energy_weekly_wh,
            EnergyWindow::Monthly => &mut self.energy_monthly_wh,
        }
    }

    /// Add `power_w * elapsed_hours` to every window. No clamping: negative
    /// power lowers the totals.
    pub fn integrate(&mut self, power_w: f64, elapsed_hours: f64) {
        let wh = power_w * elapsed_hours;
        self.energy_daily_wh += wh;
        self.energy_weekly_wh += wh;
        self.energy_monthly_wh += wh;
    }

    pub fn reset(&mut self, window: EnergyWindow) {
        *self.energy_mut(window) = 0.0;
    }
}

/// What happened to a channel during one accumulation pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChannelOutcome {
    /// No pin configured, channel untouched
    Disabled,
    /// Fresh measurement integrated
    Measured,
    /// Measurement failed, previous values kept
    Retained(SensorError),
}

/// Integrates per-channel real power into daily/weekly/monthly energy totals
///
/// ## Cycle contract
///
/// 1. [`advance`](Self::advance) with the monotonic time of the cycle. The very
///    first call only records the baseline and returns `None`; later calls
///    return the elapsed hours since the previous call.
/// 2. [`accumulate`](Self::accumulate) measures every enabled channel and adds
///    `real_power * elapsed_hours` to its totals.
/// 3. [`publish`](Self::publish) hands current values to a sink.
pub struct EnergyAccumulator {
    channels: [ChannelState; CHANNEL_COUNT],
    /// Monotonic time of the previous cycle, `None` until the baseline exists
    last_update_ms: Option<u32>,
    /// Latest RMS voltage from any source
    last_vrms: Option<f32>,
}

impl EnergyAccumulator {
    pub const fn new() -> Self {
        Self {
            channels: [ChannelState::zeroed(); CHANNEL_COUNT],
            last_update_ms: None,
            last_vrms: None,
        }
    }

    /// Replace the energy totals of every channel with persisted values
    pub fn restore(&mut self, totals: &EnergyTotals) {
        for (index, state) in self.channels.iter_mut().enumerate() {
            for window in EnergyWindow::ALL {
                *state.energy_mut(window) = totals.get(index, window);
            }
        }
    }

    pub fn totals(&self) -> EnergyTotals {
        let mut totals = EnergyTotals::default();
        for (windows, state) in totals.wh.iter_mut().zip(self.channels.iter()) {
            for window in EnergyWindow::ALL {
                windows[window.index()] = state.energy(window);
            }
        }
        totals
    }

    pub fn channel(&self, index: usize) -> Option<&ChannelState> {
        self.channels.get(index)
    }

    pub fn channels(&self) -> &[ChannelState; CHANNEL_COUNT] {
        &self.channels
    }

    pub const fn last_vrms(&self) -> Option<f32> {
        self.last_vrms
    }

    /// Monotonic time of the previous cycle
    pub const fn last_update_ms(&self) -> Option<u32> {
        self.last_update_ms
    }

    /// Move the monotonic baseline to `now_ms`.
    ///
    /// Returns the elapsed hours since the previous call, or `None` when this
    /// call established the baseline.
    pub fn advance(&mut self, now_ms: u32) -> Option<f64> {
        let previous = self.last_update_ms.replace(now_ms)?;
        Some(ms_to_hours(elapsed_ms(now_ms, previous)))
    }

    /// Measure every enabled channel and integrate its power over `elapsed_hours`
    pub fn accumulate<A: WaveformAdapter>(
        &mut self,
        config: &MeterConfig,
        adapter: &mut A,
        elapsed_hours: f64,
    ) -> [ChannelOutcome; CHANNEL_COUNT] {
        let mut outcomes = [ChannelOutcome::Disabled; CHANNEL_COUNT];

        for (index, channel) in config.enabled_channels() {
            let state = &mut self.channels[index];

            let measurement = adapter.measure(channel, &config.voltage).and_then(|m| {
                if m.is_finite() {
                    Ok(m)
                } else {
                    Err(SensorError::InvalidReading {
                        sensor: "current channel",
                    })
                }
            });

            outcomes[index] = match measurement {
                Ok(m) => {
                    state.last_irms = m.irms;
                    state.last_power_w = m.real_power;
                    state.integrate(m.real_power as f64, elapsed_hours);
                    self.last_vrms = Some(m.vrms);

                    debug!(
                        "CT{}: {:.3} A, {:.1} W, daily {:.3} Wh",
                        index, m.irms, m.real_power, state.energy_daily_wh
                    );
                    ChannelOutcome::Measured
                }
                Err(e) => {
                    warn!(
                        "CT{}: measurement unavailable, keeping last values: {}",
                        index, e
                    );
                    ChannelOutcome::Retained(e)
                }
            };
        }

        match adapter.measure_voltage(&config.voltage) {
            Some(Ok(vrms)) if vrms.is_finite() => self.last_vrms = Some(vrms),
            Some(Ok(_)) => warn!("Voltage measurement is not finite, keeping last value"),
            Some(Err(e)) => warn!("Voltage measurement unavailable: {}", e),
            None => {}
        }

        outcomes
    }

    /// Zero `window` for every channel, enabled or not
    pub fn reset_window(&mut self, window: EnergyWindow) {
        for state in self.channels.iter_mut() {
            state.reset(window);
        }
    }

    /// Publish current, power and the three totals of every enabled channel,
    /// then the shared voltage when one has been measured
    pub fn publish<S: MetricSink>(&self, config: &MeterConfig, sink: &mut S) {
        for (index, _) in config.enabled_channels() {
            let state = &self.channels[index];
            sink.publish(MetricId::Current(index), state.last_irms as f64);
            sink.publish(MetricId::Power(index), state.last_power_w as f64);
            for window in EnergyWindow::ALL {
                sink.publish(MetricId::Energy(index, window), state.energy(window));
            }
        }

        if let Some(vrms) = self.last_vrms {
            sink.publish(MetricId::Voltage, vrms as f64);
        }
    }
}

impl Default for EnergyAccumulator {
    fn default() -> Self {
        Self::new()
    }
}
