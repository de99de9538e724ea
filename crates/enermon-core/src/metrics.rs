//! Published metrics
//!
//! Every value the meter reports is addressed by a [`MetricId`] and handed to a
//! [`MetricSink`]. Per enabled channel that is current (A), real power (W) and
//! the daily, weekly and monthly energy totals (Wh); the shared mains voltage
//! (V) is reported once per cycle after the channels.
//!
//! [`PubSubSink`] forwards values as [`MeterEvent`]s into an embassy
//! `PubSubChannel` so several consumers (a network publisher, a display task)
//! can each see every update.

use core::fmt::{self, Write};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::pubsub::{ImmediatePublisher, PubSubChannel};
use heapless::String;

use crate::config::MeterConfig;
use crate::storage::EnergyWindow;

/// Event queue depth. One cycle of four channels publishes 21 values.
pub const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Number of subscribers to meter events
pub const EVENT_SUBSCRIBERS: usize = 2;

/// Number of publishers (just the sampling driver)
pub const EVENT_PUBLISHERS: usize = 1;

/// Channel type carrying [`MeterEvent`]s
pub type MeterChannel = PubSubChannel<
    CriticalSectionRawMutex,
    MeterEvent,
    EVENT_CHANNEL_CAPACITY,
    EVENT_SUBSCRIBERS,
    EVENT_PUBLISHERS,
>;

/// How a consumer should aggregate a metric over time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateClass {
    /// Instantaneous reading
    Measurement,
    /// Running energy total; drops on a window reset or while power is exported
    TotalIncreasing,
}

/// Address of one published value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricId {
    /// RMS current of a channel
    Current(usize),
    /// Real power of a channel
    Power(usize),
    /// Energy total of a channel over a window
    Energy(usize, EnergyWindow),
    /// Shared mains voltage
    Voltage,
}

impl MetricId {
    /// Channel index, `None` for the shared voltage
    pub const fn channel(self) -> Option<usize> {
        match self {
            Self::Current(channel) | Self::Power(channel) | Self::Energy(channel, _) => {
                Some(channel)
            }
            Self::Voltage => None,
        }
    }

    pub const fn unit(self) -> &'static str {
        match self {
            Self::Current(_) => "A",
            Self::Power(_) => "W",
            Self::Energy(..) => "Wh",
            Self::Voltage => "V",
        }
    }

    pub const fn state_class(self) -> StateClass {
        match self {
            Self::Energy(..) => StateClass::TotalIncreasing,
            _ => StateClass::Measurement,
        }
    }

    /// Decimal places worth reporting
    pub const fn accuracy_decimals(self) -> u8 {
        match self {
            Self::Current(_) => 2,
            Self::Power(_) | Self::Energy(..) | Self::Voltage => 1,
        }
    }

    /// Stable machine key, e.g. `ct0_power` or `ct2_energy_weekly`
    pub fn key(self) -> String<24> {
        let mut key = String::new();
        // 24 bytes fit the longest key (`ct3_energy_monthly`)
        let _ = write!(key, "{}", self);
        key
    }

    /// Human readable label using the configured channel names
    pub fn label(self, config: &MeterConfig) -> String<48> {
        let mut label = String::new();
        let name = |channel: usize| {
            config
                .channels
                .get(channel)
                .map(|c| c.display_name(channel))
                .unwrap_or_default()
        };

        let _ = match self {
            Self::Current(channel) => write!(label, "{} Current", name(channel)),
            Self::Power(channel) => write!(label, "{} Power", name(channel)),
            Self::Energy(channel, window) => {
                write!(label, "{} Energy {}", name(channel), window.label())
            }
            Self::Voltage => write!(label, "Mains Voltage"),
        };
        label
    }
}

impl fmt::Display for MetricId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Current(channel) => write!(f, "ct{}_current", channel),
            Self::Power(channel) => write!(f, "ct{}_power", channel),
            Self::Energy(channel, window) => write!(f, "ct{}_energy_{}", channel, window.key()),
            Self::Voltage => write!(f, "voltage"),
        }
    }
}

/// Destination for published values
pub trait MetricSink {
    fn publish(&mut self, metric: MetricId, value: f64);
}

impl<S: MetricSink + ?Sized> MetricSink for &mut S {
    fn publish(&mut self, metric: MetricId, value: f64) {
        (**self).publish(metric, value)
    }
}

/// One published value
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeterEvent {
    pub metric: MetricId,
    pub value: f64,
}

/// Sink publishing into a [`MeterChannel`]
///
/// Publishing never waits: when a subscriber lags behind, its oldest events
/// are dropped.
///
/// ```ignore
/// static METER_EVENTS: MeterChannel = PubSubChannel::new();
///
/// let sink = PubSubSink::new(METER_EVENTS.immediate_publisher());
/// ```
pub struct PubSubSink<'a> {
    publisher: ImmediatePublisher<
        'a,
        CriticalSectionRawMutex,
        MeterEvent,
        EVENT_CHANNEL_CAPACITY,
        EVENT_SUBSCRIBERS,
        EVENT_PUBLISHERS,
    >,
}

impl<'a> PubSubSink<'a> {
    pub fn new(
        publisher: ImmediatePublisher<
            'a,
            CriticalSectionRawMutex,
            MeterEvent,
            EVENT_CHANNEL_CAPACITY,
            EVENT_SUBSCRIBERS,
            EVENT_PUBLISHERS,
        >,
    ) -> Self {
        Self { publisher }
    }
}

impl MetricSink for PubSubSink<'_> {
    fn publish(&mut self, metric: MetricId, value: f64) {
        self.publisher.publish_immediate(MeterEvent { metric, value });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PinId;

    #[test]
    fn test_keys() {
        assert_eq!(MetricId::Current(0).key().as_str(), "ct0_current");
        assert_eq!(MetricId::Power(3).key().as_str(), "ct3_power");
        assert_eq!(
            MetricId::Energy(3, EnergyWindow::Monthly).key().as_str(),
            "ct3_energy_monthly"
        );
        assert_eq!(MetricId::Voltage.key().as_str(), "voltage");
    }

    #[test]
    fn test_labels_use_channel_names() {
        let mut config = MeterConfig::default()
            .with_channel(1, PinId(35), 30.0)
            .unwrap();
        config.channels[1] = config.channels[1].clone().with_name("Heat pump").unwrap();

        assert_eq!(MetricId::Current(0).label(&config).as_str(), "CT0 Current");
        assert_eq!(
            MetricId::Energy(1, EnergyWindow::Weekly).label(&config).as_str(),
            "Heat pump Energy Weekly"
        );
        assert_eq!(MetricId::Voltage.label(&config).as_str(), "Mains Voltage");
    }

    #[test]
    fn test_units_and_state_classes() {
        assert_eq!(MetricId::Current(0).unit(), "A");
        assert_eq!(MetricId::Power(0).unit(), "W");
        assert_eq!(MetricId::Energy(0, EnergyWindow::Daily).unit(), "Wh");
        assert_eq!(MetricId::Voltage.unit(), "V");

        assert_eq!(
            MetricId::Energy(2, EnergyWindow::Daily).state_class(),
            StateClass::TotalIncreasing
        );
        assert_eq!(MetricId::Power(2).state_class(), StateClass::Measurement);
        assert_eq!(MetricId::Current(2).accuracy_decimals(), 2);
    }

    #[test]
    fn test_channel_index() {
        assert_eq!(MetricId::Energy(2, EnergyWindow::Daily).channel(), Some(2));
        assert_eq!(MetricId::Voltage.channel(), None);
    }

    #[test]
    fn test_pubsub_sink_delivers_events_in_order() {
        let channel: MeterChannel = PubSubChannel::new();
        let mut subscriber = channel.subscriber().unwrap();
        let mut sink = PubSubSink::new(channel.immediate_publisher());

        sink.publish(MetricId::Power(0), 120.5);
        sink.publish(MetricId::Voltage, 231.0);

        assert_eq!(
            subscriber.try_next_message_pure(),
            Some(MeterEvent {
                metric: MetricId::Power(0),
                value: 120.5
            })
        );
        assert_eq!(
            subscriber.try_next_message_pure().map(|e| e.metric),
            Some(MetricId::Voltage)
        );
        assert_eq!(subscriber.try_next_message_pure(), None);
    }
}
