//! Calendar rollover detection
//!
//! Each window remembers the calendar identity (not the time) at which it was
//! last reset. A window rolls over in the first cycle whose identity differs
//! from the remembered one, no matter how many periods were skipped in between:
//! a device that was off for three days resets its daily totals once.

use log::info;

use super::EnergyWindow;
use super::accumulator::EnergyAccumulator;
use crate::time::CalendarStamp;

/// Identity of a calendar day
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayBoundary {
    pub year: i32,
    pub day_of_year: u16,
}

/// Identity of a calendar month
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonthBoundary {
    pub year: i32,
    pub month: u8,
}

/// Last-seen identity of every window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundarySet {
    pub day: DayBoundary,
    /// See [`CalendarStamp::week_bucket`]
    pub week: i32,
    pub month: MonthBoundary,
}

impl From<&CalendarStamp> for BoundarySet {
    fn from(now: &CalendarStamp) -> Self {
        Self {
            day: DayBoundary {
                year: now.year,
                day_of_year: now.day_of_year,
            },
            week: now.week_bucket(),
            month: MonthBoundary {
                year: now.year,
                month: now.month,
            },
        }
    }
}

/// Windows that crossed a boundary in one check
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rollover {
    pub daily: bool,
    pub weekly: bool,
    pub monthly: bool,
}

impl Rollover {
    pub const fn any(&self) -> bool {
        self.daily || self.weekly || self.monthly
    }

    pub const fn contains(&self, window: EnergyWindow) -> bool {
        match window {
            EnergyWindow::Daily => self.daily,
            EnergyWindow::Weekly => self.weekly,
            EnergyWindow::Monthly => self.monthly,
        }
    }

    /// Crossed windows in record order
    pub fn windows(&self) -> impl Iterator<Item = EnergyWindow> + '_ {
        EnergyWindow::ALL
            .into_iter()
            .filter(move |window| self.contains(*window))
    }
}

/// Result of one rollover check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RolloverCheck {
    /// Wall clock not synchronised, nothing checked
    ClockUnavailable,
    /// No identities were known yet; "now" was adopted without resetting
    Established,
    /// Still inside the same day, week and month
    Unchanged,
    /// At least one window was reset
    Crossed(Rollover),
}

impl RolloverCheck {
    /// Whether the identities changed and must be persisted
    pub const fn flush_due(&self) -> bool {
        matches!(self, Self::Established | Self::Crossed(_))
    }

    pub const fn rollover(&self) -> Rollover {
        match self {
            Self::Crossed(rollover) => *rollover,
            _ => Rollover {
                daily: false,
                weekly: false,
                monthly: false,
            },
        }
    }
}

pub struct RolloverDetector {
    bounds: Option<BoundarySet>,
}

impl RolloverDetector {
    /// Detector without known identities; the first valid clock reading is adopted
    pub const fn new() -> Self {
        Self { bounds: None }
    }

    pub const fn with_bounds(bounds: BoundarySet) -> Self {
        Self {
            bounds: Some(bounds),
        }
    }

    pub const fn bounds(&self) -> Option<BoundarySet> {
        self.bounds
    }

    /// Compare `now` against the remembered identities without changing anything
    pub fn detect(&self, now: &CalendarStamp) -> Rollover {
        let Some(bounds) = &self.bounds else {
            return Rollover::default();
        };
        let current = BoundarySet::from(now);

        Rollover {
            daily: current.day != bounds.day,
            weekly: current.week != bounds.week,
            monthly: current.month != bounds.month,
        }
    }

    /// Reset every crossed window in `accumulator` and adopt `now` for it.
    ///
    /// `now` is `None` while the wall clock is unavailable, which suppresses the
    /// check entirely.
    pub fn check(
        &mut self,
        now: Option<CalendarStamp>,
        accumulator: &mut EnergyAccumulator,
    ) -> RolloverCheck {
        let Some(now) = now else {
            return RolloverCheck::ClockUnavailable;
        };
        let current = BoundarySet::from(&now);

        if self.bounds.is_none() {
            info!(
                "Calendar boundaries established at {}-{:02} (day {})",
                now.year, now.month, now.day_of_year
            );
            self.bounds = Some(current);
            return RolloverCheck::Established;
        }

        let rollover = self.detect(&now);
        if !rollover.any() {
            return RolloverCheck::Unchanged;
        }

        let Some(bounds) = self.bounds.as_mut() else {
            return RolloverCheck::Unchanged;
        };
        if rollover.daily {
            bounds.day = current.day;
        }
        if rollover.weekly {
            bounds.week = current.week;
        }
        if rollover.monthly {
            bounds.month = current.month;
        }

        for window in rollover.windows() {
            accumulator.reset_window(window);
            info!("{} energy reset", window.label());
        }

        RolloverCheck::Crossed(rollover)
    }
}

impl Default for RolloverDetector {
    fn default() -> Self {
        Self::new()
    }
}
