//! Desktop simulator for the enermon energy monitor.
//!
//! Runs the enermon-core [`Meter`] against synthetic 50 Hz waveforms on a
//! virtual clock that runs much faster than real time, so a simulated day
//! passes in seconds. Meter state lives in a directory on disk; stop and
//! restart the simulator to watch it resume from the saved totals.
//!
//! # Environment
//!
//! | Variable            | Default          | Meaning                               |
//! |---------------------|------------------|---------------------------------------|
//! | `ENERMON_STATE_DIR` | `enermon-state`  | Directory of the key/value store      |
//! | `ENERMON_CYCLES`    | `2880`           | Sampling cycles to run                |
//! | `ENERMON_STEP_SECS` | `60`             | Virtual seconds between cycles        |
//! | `ENERMON_PAUSE_MS`  | `0`              | Real milliseconds to sleep per cycle  |
//! | `RUST_LOG`          | unset            | `env_logger` filter, e.g. `info`      |

use std::cell::Cell;
use std::f64::consts::TAU;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use embassy_sync::pubsub::PubSubChannel;
use embassy_time::Duration;
use log::{debug, info, warn};

use enermon_core::metrics::{MeterChannel, PubSubSink};
use enermon_core::sensors::{ADC_MAX, AdcReader, BurstRmsAdapter};
use enermon_core::storage::{KeyValueStore, PersistenceGateway, StoreError};
use enermon_core::{
    EnergyWindow, Meter, MeterConfig, MetricId, MonotonicClock, PinId, SensorError, TickOutcome,
    WallClock,
};

// ---------------------------------------------------------------------------
// Simulation constants
// ---------------------------------------------------------------------------

/// Mains frequency of the synthetic waveforms
const MAINS_HZ: f64 = 50.0;

/// Time between two ADC reads of the same pin
const SAMPLE_INTERVAL_SECS: f64 = 0.001;

/// Current channel pins, in channel order
const CT_PINS: [PinId; 4] = [PinId(34), PinId(35), PinId(36), PinId(37)];
const VOLTAGE_PIN: PinId = PinId(39);

/// CT calibration used by the simulated channels
const CT_CALIBRATION: f32 = 30.0;

/// Store key holding the virtual wall clock at exit, `i64` little-endian
const CLOCK_KEY: &str = "clock";

/// Meter events, drained and logged after every cycle
static METER_EVENTS: MeterChannel = PubSubChannel::new();

// ---------------------------------------------------------------------------
// Virtual clock
// ---------------------------------------------------------------------------

/// Monotonic and wall clock advanced by the simulation loop
struct VirtualClock {
    start_unix: i64,
    elapsed_ms: Cell<u64>,
}

impl VirtualClock {
    fn starting_at(start_unix: i64) -> Self {
        Self {
            start_unix,
            elapsed_ms: Cell::new(0),
        }
    }

    /// Continue from the virtual time a previous run stopped at, or from real now
    fn resume(store: &mut FileStore) -> Self {
        let saved = match store.load(CLOCK_KEY) {
            Ok(Some(bytes)) => bytes.as_slice().try_into().ok().map(i64::from_le_bytes),
            Ok(None) => None,
            Err(e) => {
                warn!("Could not read virtual clock: {}", e);
                None
            }
        };

        match saved {
            Some(unix) => {
                info!("Resuming virtual clock at unix {}", unix);
                Self::starting_at(unix)
            }
            None => Self::starting_at(
                SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs() as i64)
                    .unwrap_or_default(),
            ),
        }
    }

    fn save(&self, store: &mut FileStore) -> Result<(), StoreError> {
        store.save(CLOCK_KEY, &self.now_unix().to_le_bytes())
    }

    fn advance(&self, step: Duration) {
        self.elapsed_ms.set(self.elapsed_ms.get() + step.as_millis());
    }

    fn elapsed_secs(&self) -> f64 {
        self.elapsed_ms.get() as f64 / 1000.0
    }
}

impl MonotonicClock for VirtualClock {
    fn now_ms(&self) -> u32 {
        // Truncation wraps like a real 32-bit tick counter
        self.elapsed_ms.get() as u32
    }
}

impl WallClock for VirtualClock {
    fn now_unix(&self) -> i64 {
        self.start_unix + (self.elapsed_ms.get() / 1000) as i64
    }
}

// ---------------------------------------------------------------------------
// Synthetic ADC
// ---------------------------------------------------------------------------

/// Household-like load on one channel
struct LoadProfile {
    /// Base load in amps RMS
    base_amps: f64,
    /// Amplitude of the slow daily swing in amps RMS
    swing_amps: f64,
    /// Phase lag of the current behind the voltage, radians
    lag: f64,
}

const LOADS: [LoadProfile; 4] = [
    LoadProfile {
        base_amps: 2.0,
        swing_amps: 1.5,
        lag: 0.1,
    },
    LoadProfile {
        base_amps: 0.4,
        swing_amps: 0.2,
        lag: 0.0,
    },
    LoadProfile {
        base_amps: 6.0,
        swing_amps: 4.0,
        lag: 0.3,
    },
    LoadProfile {
        base_amps: 1.0,
        swing_amps: 0.5,
        lag: 0.05,
    },
];

/// 12-bit ADC producing biased sine waves for the CT and voltage pins
struct SyntheticAdc {
    /// Virtual seconds at the start of the current burst
    now_secs: f64,
    reads: [u32; 5],
    voltage_rms: f64,
}

impl SyntheticAdc {
    fn new(voltage_rms: f64) -> Self {
        Self {
            now_secs: 0.0,
            reads: [0; 5],
            voltage_rms,
        }
    }

    /// Start a new burst at `now_secs` of virtual time
    fn begin_burst(&mut self, now_secs: f64) {
        self.now_secs = now_secs;
        self.reads = [0; 5];
    }

    fn counts(peak: f64, angle: f64, calibration: f64) -> u16 {
        let units_per_count = calibration * 3.3 / ADC_MAX as f64;
        let mid = (ADC_MAX as f64 + 1.0) / 2.0;
        let value = mid + peak * angle.sin() / units_per_count;
        value.clamp(0.0, ADC_MAX as f64) as u16
    }
}

impl AdcReader for SyntheticAdc {
    fn read_raw(&mut self, pin: PinId) -> Result<u16, SensorError> {
        let slot = if pin == VOLTAGE_PIN {
            4
        } else {
            CT_PINS
                .iter()
                .position(|p| *p == pin)
                .ok_or(SensorError::ReadFailed {
                    sensor: "synthetic adc",
                    pin: pin.0,
                    details: "pin not wired",
                })?
        };

        let t = self.reads[slot] as f64 * SAMPLE_INTERVAL_SECS;
        self.reads[slot] += 1;
        let angle = TAU * MAINS_HZ * t;

        if slot == 4 {
            let peak = self.voltage_rms * 2f64.sqrt();
            return Ok(Self::counts(peak, angle, self.voltage_rms));
        }

        let load = &LOADS[slot];
        let day_phase = TAU * self.now_secs / 86_400.0;
        let rms = load.base_amps + load.swing_amps * (day_phase + slot as f64).sin();
        let peak = rms.max(0.0) * 2f64.sqrt();
        Ok(Self::counts(peak, angle - load.lag, CT_CALIBRATION as f64))
    }
}

// ---------------------------------------------------------------------------
// Directory-backed key/value store
// ---------------------------------------------------------------------------

/// One file per key; writes go through a temporary file and a rename
#[derive(Clone)]
struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    fn open(dir: PathBuf) -> io::Result<Self> {
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }
}

fn io_error(e: io::Error) -> StoreError {
    StoreError::backend(&e.to_string())
}

impl KeyValueStore for FileStore {
    fn save(&mut self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let path = self.dir.join(key);
        let tmp = self.dir.join(format!("{key}.tmp"));
        fs::write(&tmp, bytes).map_err(io_error)?;
        fs::rename(&tmp, &path).map_err(io_error)
    }

    fn load(&mut self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match fs::read(self.dir.join(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(e)),
        }
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

struct Settings {
    state_dir: PathBuf,
    cycles: u32,
    step: Duration,
    pause: std::time::Duration,
}

fn env_number(name: &str, default: u64) -> u64 {
    match std::env::var(name) {
        Ok(value) => value.parse().unwrap_or_else(|_| {
            warn!("Ignoring {}={:?}, using {}", name, value, default);
            default
        }),
        Err(_) => default,
    }
}

impl Settings {
    fn from_env() -> Self {
        Self {
            state_dir: std::env::var_os("ENERMON_STATE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("enermon-state")),
            cycles: env_number("ENERMON_CYCLES", 2880) as u32,
            step: Duration::from_secs(env_number("ENERMON_STEP_SECS", 60).max(1)),
            pause: std::time::Duration::from_millis(env_number("ENERMON_PAUSE_MS", 0)),
        }
    }
}

fn default_config() -> MeterConfig {
    let mut config = MeterConfig::default().with_voltage(Some(VOLTAGE_PIN), 230.0, 1.0, 200);
    let names = ["Kitchen", "Lights", "Heat pump", "Office"];
    for (index, (pin, name)) in CT_PINS.iter().zip(names).enumerate() {
        if let Ok(with_channel) = config.clone().with_channel(index, *pin, CT_CALIBRATION) {
            config = with_channel;
        }
        if let Ok(named) = config.channels[index].clone().with_name(name) {
            config.channels[index] = named;
        }
    }
    config
}

/// Stored configuration, or the default one saved for next time
fn load_or_init_config(store: FileStore) -> MeterConfig {
    let default = default_config();
    let mut gateway = PersistenceGateway::new(store, &default);

    match gateway.load_config() {
        Ok(Some(config)) => {
            info!("Using stored configuration");
            config
        }
        Ok(None) => {
            if let Err(e) = gateway.save_config(&default) {
                warn!("Could not store default configuration: {}", e);
            }
            default
        }
        Err(e) => {
            warn!("Could not read configuration: {}", e);
            default
        }
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn main() {
    env_logger::init();
    let settings = Settings::from_env();
    info!("Starting enermon simulator");
    info!(
        "State in {}, {} cycles of {} virtual seconds",
        settings.state_dir.display(),
        settings.cycles,
        settings.step.as_secs()
    );

    let mut store = match FileStore::open(settings.state_dir.clone()) {
        Ok(store) => store,
        Err(e) => {
            log::error!("Cannot open state directory: {}", e);
            std::process::exit(1);
        }
    };
    let config = load_or_init_config(store.clone());

    let mut events = match METER_EVENTS.subscriber() {
        Ok(subscriber) => subscriber,
        Err(e) => {
            log::error!("Cannot subscribe to meter events: {:?}", e);
            std::process::exit(1);
        }
    };

    let clock = VirtualClock::resume(&mut store);
    let adapter = BurstRmsAdapter::new(SyntheticAdc::new(f64::from(config.voltage.calibration)));
    let sink = PubSubSink::new(METER_EVENTS.immediate_publisher());
    let mut meter = match Meter::new(config.clone(), adapter, sink, store.clone(), &clock) {
        Ok(meter) => meter,
        Err(e) => {
            log::error!("{}", e);
            std::process::exit(1);
        }
    };

    info!(
        "Sampling every {} ms, saving at least every {} s",
        config.sample_period().as_millis(),
        config.persist_interval().as_secs()
    );

    // Steps shorter than the sampling period would only produce NotDue ticks
    let step = if settings.step < config.sample_period() {
        config.sample_period()
    } else {
        settings.step
    };

    for cycle in 0..settings.cycles {
        meter.adapter_mut().adc_mut().begin_burst(clock.elapsed_secs());

        match meter.tick() {
            TickOutcome::Completed(report) => {
                if let Some(e) = report.save_error {
                    warn!("Cycle {}: state not saved: {}", cycle, e);
                }
                if report.rollover.rollover().any() {
                    info!("Cycle {}: {:?}", cycle, report.rollover);
                }
            }
            TickOutcome::Baseline => info!("Baseline established"),
            other => debug!("Cycle {}: {:?}", cycle, other),
        }

        while let Some(event) = events.try_next_message_pure() {
            let precision = usize::from(event.metric.accuracy_decimals());
            let line = format!(
                "{:<28} {:>12.*} {}",
                event.metric.label(&config).as_str(),
                precision,
                event.value,
                event.metric.unit()
            );
            if matches!(event.metric, MetricId::Energy(_, EnergyWindow::Daily))
                && cycle % 60 == 0
            {
                info!("{}", line);
            } else {
                debug!("{}", line);
            }
        }

        clock.advance(step);
        if !settings.pause.is_zero() {
            std::thread::sleep(settings.pause);
        }
    }

    match meter.flush() {
        Ok(()) => info!("Final state saved"),
        Err(e) => warn!("Final save failed: {}", e),
    }
    if let Err(e) = clock.save(&mut store) {
        warn!("Could not save virtual clock: {}", e);
    }
    info!("Simulator exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_store(name: &str) -> FileStore {
        let dir = std::env::temp_dir().join(format!("enermon-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        FileStore::open(dir).unwrap()
    }

    #[test]
    fn test_clock_resumes_where_previous_run_stopped() {
        let mut store = scratch_store("clock-resume");

        let first = VirtualClock::starting_at(1_704_931_200);
        first.advance(Duration::from_secs(25 * 3600));
        first.save(&mut store).unwrap();

        let second = VirtualClock::resume(&mut store);
        assert_eq!(second.now_unix(), 1_704_931_200 + 25 * 3600);
        assert_eq!(second.now_ms(), 0);

        let _ = fs::remove_dir_all(&store.dir);
    }

    #[test]
    fn test_clock_without_saved_time_starts_at_real_now() {
        let mut store = scratch_store("clock-fresh");
        let before = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64;

        let clock = VirtualClock::resume(&mut store);

        assert!(clock.now_unix() >= before);
        let _ = fs::remove_dir_all(&store.dir);
    }
}
