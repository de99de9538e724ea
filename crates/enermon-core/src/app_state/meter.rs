use log::{debug, error, info, warn};

use super::{CycleReport, DriverState, MeterError, PersistReason, TickOutcome};
use crate::config::MeterConfig;
use crate::metrics::MetricSink;
use crate::sensors::WaveformAdapter;
use crate::storage::{
    BoundarySet, EnergyAccumulator, KeyValueStore, PersistenceGateway, RolloverCheck,
    RolloverDetector, StoreError,
};
use crate::time::{CalendarStamp, MonotonicClock, WallClock, elapsed_ms};

/// Four-channel energy meter
///
/// Owns the channel state, the calendar boundaries and the persistence policy,
/// and drives them from [`tick`](Self::tick). The host calls `tick` as often as
/// it likes; a cycle runs only once the sampling period has elapsed.
///
/// Each completed cycle runs, in order:
///
/// 1. advance the monotonic baseline and measure/integrate every enabled channel
/// 2. check calendar rollover (skipped while the wall clock is unavailable)
/// 3. persist when a window was reset or the flush interval elapsed
/// 4. publish every value to the sink
///
/// Energy of the cycle that crosses a boundary is counted in the old period:
/// it is integrated before the reset.
///
/// ```ignore
/// let mut meter = Meter::new(config, adapter, sink, store, &clock)?;
/// loop {
///     meter.tick();
///     Timer::after(meter.config().sample_period()).await;
/// }
/// ```
pub struct Meter<A, S, K, T> {
    config: MeterConfig,
    adapter: A,
    sink: S,
    persistence: PersistenceGateway<K>,
    clock: T,
    accumulator: EnergyAccumulator,
    detector: RolloverDetector,
    state: DriverState,
}

impl<A, S, K, T> Meter<A, S, K, T>
where
    A: WaveformAdapter,
    S: MetricSink,
    K: KeyValueStore,
    T: MonotonicClock + WallClock,
{
    /// Validate `config` and restore persisted state from `store`.
    ///
    /// Missing or invalid records start from zeroed energy. Missing boundaries
    /// are taken from the current wall clock, or from its first valid reading
    /// when it is not available yet.
    pub fn new(
        config: MeterConfig,
        adapter: A,
        sink: S,
        store: K,
        clock: T,
    ) -> Result<Self, MeterError> {
        if let Err(e) = config.validate() {
            error!("Meter configuration rejected: {}", e);
            return Err(e.into());
        }

        let mut persistence = PersistenceGateway::new(store, &config);
        let restored = persistence.restore();

        let mut accumulator = EnergyAccumulator::new();
        if let Some(totals) = restored.totals {
            accumulator.restore(&totals);
        }

        let bounds = restored.bounds.or_else(|| {
            CalendarStamp::from_unix(clock.now_unix(), config.utc_offset_secs)
                .map(|now| BoundarySet::from(&now))
        });
        let detector = match bounds {
            Some(bounds) => RolloverDetector::with_bounds(bounds),
            None => {
                info!("Wall clock unavailable, calendar boundaries deferred");
                RolloverDetector::new()
            }
        };

        info!(
            "Meter ready with {} channel(s), sampling every {} ms",
            config.enabled_channels().count(),
            config.sample_period_ms
        );

        Ok(Self {
            config,
            adapter,
            sink,
            persistence,
            clock,
            accumulator,
            detector,
            state: DriverState::Idle,
        })
    }

    /// Run one sampling cycle if it is due
    pub fn tick(&mut self) -> TickOutcome {
        if self.state == DriverState::Measuring {
            return TickOutcome::Busy;
        }

        let now_ms = self.clock.now_ms();
        if let Some(last) = self.accumulator.last_update_ms()
            && elapsed_ms(now_ms, last) < self.config.sample_period_ms
        {
            return TickOutcome::NotDue;
        }

        self.state = DriverState::Measuring;
        let outcome = self.run_cycle(now_ms);
        self.state = DriverState::Idle;
        outcome
    }

    fn run_cycle(&mut self, now_ms: u32) -> TickOutcome {
        let Some(elapsed_hours) = self.accumulator.advance(now_ms) else {
            self.persistence.mark_baseline(now_ms);
            debug!("Time baseline set at {} ms", now_ms);
            return TickOutcome::Baseline;
        };

        let outcomes = self
            .accumulator
            .accumulate(&self.config, &mut self.adapter, elapsed_hours);

        let calendar = CalendarStamp::from_unix(self.clock.now_unix(), self.config.utc_offset_secs);
        let rollover = self.detector.check(calendar, &mut self.accumulator);
        if rollover == RolloverCheck::ClockUnavailable {
            debug!("Wall clock unavailable, rollover check skipped");
        }

        let persisted = if rollover.flush_due() {
            Some(PersistReason::Boundary)
        } else if self.persistence.interval_due(now_ms) {
            Some(PersistReason::Interval)
        } else {
            None
        };
        let save_error = persisted.and_then(|reason| self.persist(now_ms, reason).err());

        self.accumulator.publish(&self.config, &mut self.sink);

        TickOutcome::Completed(CycleReport {
            elapsed_hours,
            rollover,
            persisted,
            save_error,
            outcomes,
        })
    }

    fn persist(&mut self, now_ms: u32, reason: PersistReason) -> Result<(), StoreError> {
        let totals = self.accumulator.totals();
        match self
            .persistence
            .persist(now_ms, &totals, self.detector.bounds())
        {
            Ok(()) => {
                info!("Meter state saved ({})", reason);
                Ok(())
            }
            Err(e) => {
                warn!("Failed to save meter state ({}): {}", reason, e);
                Err(e)
            }
        }
    }

    /// Persist the current state now, e.g. before a planned shutdown
    pub fn flush(&mut self) -> Result<(), MeterError> {
        let now_ms = self.clock.now_ms();
        self.persist(now_ms, PersistReason::Requested)?;
        Ok(())
    }

    pub fn config(&self) -> &MeterConfig {
        &self.config
    }

    pub const fn state(&self) -> DriverState {
        self.state
    }

    pub fn accumulator(&self) -> &EnergyAccumulator {
        &self.accumulator
    }

    /// Calendar identities the windows were last reset at
    pub const fn bounds(&self) -> Option<BoundarySet> {
        self.detector.bounds()
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn adapter_mut(&mut self) -> &mut A {
        &mut self.adapter
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn store(&self) -> &K {
        self.persistence.store()
    }

    pub fn store_mut(&mut self) -> &mut K {
        self.persistence.store_mut()
    }

    pub fn clock(&self) -> &T {
        &self.clock
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;

    use alloc::vec::Vec;

    use crate::config::{ChannelConfig, ConfigError, PinId, VoltageConfig};
    use crate::metrics::MetricId;
    use crate::sensors::{Measurement, SensorError};
    use crate::storage::{ChannelOutcome, EnergyWindow, MemoryStore};

    // 2024-01-11T00:00:00Z, day 10 of 2024
    const JAN_11_2024: i64 = 1_704_931_200;
    const HOUR_MS: u32 = 3_600_000;

    struct TestClock {
        ms: Cell<u32>,
        unix: Cell<i64>,
    }

    impl TestClock {
        fn new(ms: u32, unix: i64) -> Self {
            Self {
                ms: Cell::new(ms),
                unix: Cell::new(unix),
            }
        }

        fn advance(&self, ms: u32) {
            self.ms.set(self.ms.get().wrapping_add(ms));
            if self.unix.get() != 0 {
                self.unix.set(self.unix.get() + (ms / 1000) as i64);
            }
        }
    }

    impl MonotonicClock for TestClock {
        fn now_ms(&self) -> u32 {
            self.ms.get()
        }
    }

    impl WallClock for TestClock {
        fn now_unix(&self) -> i64 {
            self.unix.get()
        }
    }

    struct ConstantPower {
        watts: f32,
        failing: bool,
        calls: usize,
    }

    impl ConstantPower {
        fn new(watts: f32) -> Self {
            Self {
                watts,
                failing: false,
                calls: 0,
            }
        }
    }

    impl WaveformAdapter for ConstantPower {
        fn measure(
            &mut self,
            channel: &ChannelConfig,
            _voltage: &VoltageConfig,
        ) -> Result<Measurement, SensorError> {
            self.calls += 1;
            if self.failing {
                return Err(SensorError::ReadFailed {
                    sensor: "test",
                    pin: channel.pin.map_or(0, |p| p.0),
                    details: "injected",
                });
            }
            Ok(Measurement::new(self.watts / 230.0, 230.0, self.watts))
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        published: Vec<(MetricId, f64)>,
    }

    impl RecordingSink {
        fn last(&self, metric: MetricId) -> Option<f64> {
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

    type TestMeter<'c> = Meter<ConstantPower, RecordingSink, MemoryStore, &'c TestClock>;

    fn one_channel_config() -> MeterConfig {
        MeterConfig::default()
            .with_channel(0, PinId(34), 30.0)
            .unwrap()
    }

    fn meter_with(clock: &TestClock, store: MemoryStore, watts: f32) -> TestMeter<'_> {
        Meter::new(
            one_channel_config(),
            ConstantPower::new(watts),
            RecordingSink::default(),
            store,
            clock,
        )
        .unwrap()
    }

    fn approx(a: f64, b: f64) -> bool {
        let diff = a - b;
        diff < 1e-6 && diff > -1e-6
    }

    fn daily(meter: &TestMeter<'_>) -> f64 {
        meter.accumulator().channel(0).unwrap().energy_daily_wh
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let clock = TestClock::new(0, JAN_11_2024);
        let mut config = one_channel_config();
        config.sample_period_ms = 0;

        let result = Meter::new(
            config,
            ConstantPower::new(100.0),
            RecordingSink::default(),
            MemoryStore::new(),
            &clock,
        );

        assert!(matches!(
            result,
            Err(MeterError::Config(ConfigError::ZeroSamplePeriod))
        ));
    }

    #[test]
    fn test_first_cycle_only_sets_baseline() {
        let clock = TestClock::new(1_000, JAN_11_2024);
        let mut meter = meter_with(&clock, MemoryStore::new(), 100.0);

        assert_eq!(meter.tick(), TickOutcome::Baseline);

        assert_eq!(meter.adapter().calls, 0);
        assert!(meter.sink().published.is_empty());
        assert_eq!(daily(&meter), 0.0);
        assert_eq!(meter.store().save_count(), 0);
        assert_eq!(meter.state(), DriverState::Idle);
    }

    #[test]
    fn test_full_day_then_rollover() {
        let clock = TestClock::new(0, JAN_11_2024);
        let mut meter = meter_with(&clock, MemoryStore::new(), 100.0);
        meter.tick();

        for _ in 0..23 {
            clock.advance(HOUR_MS);
            assert!(meter.tick().report().is_some());
        }
        assert!(approx(daily(&meter), 2300.0));

        // Midnight into day 11: the last hour still belongs to day 10
        clock.advance(HOUR_MS);
        let outcome = meter.tick();
        let report = outcome.report().unwrap();

        assert!(report.rollover.rollover().daily);
        assert!(!report.rollover.rollover().weekly);
        assert_eq!(report.persisted, Some(PersistReason::Boundary));

        let state = meter.accumulator().channel(0).unwrap();
        assert_eq!(state.energy_daily_wh, 0.0);
        assert!(approx(state.energy_weekly_wh, 2400.0));
        assert!(approx(state.energy_monthly_wh, 2400.0));
        assert_eq!(
            meter
                .sink()
                .last(MetricId::Energy(0, EnergyWindow::Daily)),
            Some(0.0)
        );
    }

    #[test]
    fn test_energy_grows_with_positive_power() {
        let clock = TestClock::new(0, JAN_11_2024);
        let mut meter = meter_with(&clock, MemoryStore::new(), 50.0);
        meter.tick();

        let mut previous = 0.0;
        for _ in 0..10 {
            clock.advance(60_000);
            meter.tick();
            let current = daily(&meter);
            assert!(current > previous);
            previous = current;
        }
        assert!(approx(previous, 50.0 * 10.0 / 60.0));
    }

    #[test]
    fn test_tick_before_period_is_not_due() {
        let clock = TestClock::new(0, JAN_11_2024);
        let mut meter = meter_with(&clock, MemoryStore::new(), 100.0);
        meter.tick();

        clock.advance(199);
        assert_eq!(meter.tick(), TickOutcome::NotDue);
        assert_eq!(meter.adapter().calls, 0);

        clock.advance(1);
        assert!(meter.tick().report().is_some());
        assert_eq!(meter.adapter().calls, 1);
    }

    #[test]
    fn test_tick_while_measuring_is_ignored() {
        let clock = TestClock::new(0, JAN_11_2024);
        let mut meter = meter_with(&clock, MemoryStore::new(), 100.0);
        meter.tick();
        clock.advance(HOUR_MS);

        meter.state = DriverState::Measuring;
        assert_eq!(meter.tick(), TickOutcome::Busy);
        assert_eq!(meter.adapter().calls, 0);

        meter.state = DriverState::Idle;
        assert!(meter.tick().report().is_some());
    }

    #[test]
    fn test_state_survives_restart() {
        let clock = TestClock::new(0, JAN_11_2024);
        let mut meter = meter_with(&clock, MemoryStore::new(), 100.0);
        meter.tick();
        clock.advance(HOUR_MS);
        meter.tick();
        clock.advance(HOUR_MS);
        meter.tick();
        let totals = meter.accumulator().totals();
        meter.flush().unwrap();

        let store = meter.store().clone();
        let restarted = meter_with(&clock, store, 100.0);

        assert_eq!(restarted.accumulator().totals(), totals);
        assert!(approx(daily(&restarted), 200.0));
        assert_eq!(restarted.bounds(), meter.bounds());
    }

    #[test]
    fn test_restart_on_a_later_day_resets_once() {
        let clock = TestClock::new(0, JAN_11_2024);
        let mut meter = meter_with(&clock, MemoryStore::new(), 100.0);
        meter.tick();
        clock.advance(HOUR_MS);
        meter.tick();
        meter.flush().unwrap();
        let store = meter.store().clone();

        // Powered off for three days
        let clock = TestClock::new(0, JAN_11_2024 + 3 * 86_400);
        let mut restarted = meter_with(&clock, store, 100.0);
        restarted.tick();
        clock.advance(HOUR_MS);
        let report = restarted.tick().report().cloned().unwrap();

        assert!(report.rollover.rollover().daily);
        assert_eq!(daily(&restarted), 0.0);
        assert!(approx(
            restarted.accumulator().channel(0).unwrap().energy_monthly_wh,
            200.0
        ));

        clock.advance(HOUR_MS);
        let report = restarted.tick().report().cloned().unwrap();
        assert_eq!(report.rollover, RolloverCheck::Unchanged);
    }

    #[test]
    fn test_unavailable_clock_defers_boundaries() {
        let clock = TestClock::new(0, 0);
        let mut meter = meter_with(&clock, MemoryStore::new(), 100.0);
        assert_eq!(meter.bounds(), None);
        meter.tick();

        clock.advance(HOUR_MS);
        let report = meter.tick().report().cloned().unwrap();
        assert_eq!(report.rollover, RolloverCheck::ClockUnavailable);
        assert_eq!(report.persisted, Some(PersistReason::Interval));
        assert!(approx(daily(&meter), 100.0));

        clock.unix.set(JAN_11_2024);
        clock.advance(HOUR_MS);
        let report = meter.tick().report().cloned().unwrap();
        assert_eq!(report.rollover, RolloverCheck::Established);
        assert_eq!(report.persisted, Some(PersistReason::Boundary));
        assert!(approx(daily(&meter), 200.0));
        assert!(meter.bounds().is_some());
    }

    #[test]
    fn test_interval_flush() {
        let clock = TestClock::new(0, JAN_11_2024);
        let mut meter = meter_with(&clock, MemoryStore::new(), 100.0);
        meter.tick();

        clock.advance(60_000);
        assert_eq!(meter.tick().report().unwrap().persisted, None);

        clock.advance(240_000);
        assert_eq!(
            meter.tick().report().unwrap().persisted,
            Some(PersistReason::Interval)
        );
        assert_eq!(meter.store().save_count(), 2);

        clock.advance(60_000);
        assert_eq!(meter.tick().report().unwrap().persisted, None);
    }

    #[test]
    fn test_save_failure_is_not_fatal() {
        let clock = TestClock::new(0, JAN_11_2024);
        let mut meter = meter_with(&clock, MemoryStore::new(), 100.0);
        meter.store_mut().set_fail_saves(true);
        meter.tick();

        clock.advance(HOUR_MS);
        let report = meter.tick().report().cloned().unwrap();

        assert_eq!(report.persisted, Some(PersistReason::Interval));
        assert_eq!(report.save_error, Some(StoreError::Unavailable));
        assert!(approx(daily(&meter), 100.0));
        assert!(meter.sink().last(MetricId::Power(0)).is_some());
        assert_eq!(meter.state(), DriverState::Idle);
        assert_eq!(meter.flush(), Err(MeterError::Store(StoreError::Unavailable)));
    }

    #[test]
    fn test_failed_measurement_republishes_last_values() {
        let clock = TestClock::new(0, JAN_11_2024);
        let mut meter = meter_with(&clock, MemoryStore::new(), 100.0);
        meter.tick();
        clock.advance(HOUR_MS);
        meter.tick();

        meter.adapter_mut().failing = true;
        meter.sink_mut().published.clear();
        clock.advance(HOUR_MS);
        let report = meter.tick().report().cloned().unwrap();

        assert!(matches!(report.outcomes[0], ChannelOutcome::Retained(_)));
        assert!(approx(daily(&meter), 100.0));
        assert_eq!(meter.sink().last(MetricId::Power(0)), Some(100.0));
    }

    #[test]
    fn test_disabled_channels_stay_silent() {
        let clock = TestClock::new(0, JAN_11_2024);
        let mut meter = meter_with(&clock, MemoryStore::new(), 100.0);
        meter.tick();
        clock.advance(HOUR_MS);
        meter.tick();

        assert_eq!(meter.adapter().calls, 1);
        assert!(
            meter
                .sink()
                .published
                .iter()
                .all(|(metric, _)| matches!(metric.channel(), Some(0) | None))
        );
        for index in 1..4 {
            let state = meter.accumulator().channel(index).unwrap();
            assert_eq!(state.energy_monthly_wh, 0.0);
        }
        assert_eq!(meter.sink().last(MetricId::Voltage), Some(230.0));
    }

    #[test]
    fn test_monotonic_counter_wraparound() {
        let clock = TestClock::new(u32::MAX - HOUR_MS / 2 + 1, JAN_11_2024);
        let mut meter = meter_with(&clock, MemoryStore::new(), 100.0);
        meter.tick();

        clock.advance(HOUR_MS);
        let report = meter.tick().report().cloned().unwrap();

        assert!(approx(report.elapsed_hours, 1.0));
        assert!(approx(daily(&meter), 100.0));
    }
}
