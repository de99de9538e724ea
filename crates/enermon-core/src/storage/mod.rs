pub mod accumulator;
pub mod manager;
pub mod records;
pub mod rollover;

pub use accumulator::{ChannelOutcome, ChannelState, EnergyAccumulator};
pub use manager::{
    BOUNDS_KEY, CONFIG_KEY, ENERGY_KEY, KeyValueStore, MemoryStore, PersistenceGateway, Restored,
    StoreError,
};
pub use records::{BoundaryRecord, EnergyRecord, EnergyTotals, RecordError};
pub use rollover::{
    BoundarySet, DayBoundary, MonthBoundary, Rollover, RolloverCheck, RolloverDetector,
};

/// Calendar window an energy total is accumulated over
///
/// Each window is reset when the wall clock enters a new day, week or month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnergyWindow {
    /// Reset at every new day of the year
    Daily,
    /// Reset at every new fixed-width week bucket
    Weekly,
    /// Reset at every new calendar month
    Monthly,
}

impl EnergyWindow {
    /// All windows in record order
    pub const ALL: [EnergyWindow; 3] = [Self::Daily, Self::Weekly, Self::Monthly];

    /// Position of this window in persisted records
    pub const fn index(self) -> usize {
        match self {
            Self::Daily => 0,
            Self::Weekly => 1,
            Self::Monthly => 2,
        }
    }

    /// Get a short label for metric keys
    pub const fn key(self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }

    /// Get a label for display
    pub const fn label(self) -> &'static str {
        match self {
            Self::Daily => "Daily",
            Self::Weekly => "Weekly",
            Self::Monthly => "Monthly",
        }
    }
}
