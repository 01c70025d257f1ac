//! Flush scheduling strategies for the deferred write scheduler.
//!
//! Three explicit strategies replace the source's cron-string-or-sentinel
//! configuration: a fixed polling interval, a five-field cron expression,
//! and `EveryTick`, the test-only strategy that fires on every worker
//! tick.

use crate::error::{TandemError, TandemResult};
use chrono::{DateTime, Datelike, Timelike, Utc};
use std::time::{Duration, Instant};

/// When the scheduler's worker should run a flush cycle.
#[derive(Debug, Clone)]
pub enum FlushStrategy {
    /// Flush every `Duration`.
    Interval(Duration),
    /// Flush when the cron expression matches the current minute.
    Cron(CronExpr),
    /// Flush on every worker tick. Test acceleration only.
    EveryTick,
}

impl FlushStrategy {
    /// Parses a five-field cron expression (`min hour day month weekday`).
    pub fn cron(expr: &str) -> TandemResult<Self> {
        CronExpr::parse(expr).map(FlushStrategy::Cron)
    }
}

/// One parsed cron field.
#[derive(Debug, Clone)]
enum CronField {
    /// All values (`*`)
    Any,
    /// A single value
    Value(u32),
    /// Step (`*/N`)
    Step(u32),
    /// Inclusive range (`A-B`)
    Range(u32, u32),
}

impl CronField {
    fn parse(s: &str) -> Option<Self> {
        if s == "*" {
            return Some(CronField::Any);
        }
        if let Some(step) = s.strip_prefix("*/") {
            return step.parse::<u32>().ok().map(CronField::Step);
        }
        if let Some((a, b)) = s.split_once('-') {
            let start = a.parse::<u32>().ok()?;
            let end = b.parse::<u32>().ok()?;
            return Some(CronField::Range(start, end));
        }
        s.parse::<u32>().ok().map(CronField::Value)
    }

    fn matches(&self, current: u32) -> bool {
        match self {
            CronField::Any => true,
            CronField::Value(v) => current == *v,
            CronField::Step(step) => *step > 0 && current % *step == 0,
            CronField::Range(start, end) => current >= *start && current <= *end,
        }
    }
}

/// A parsed five-field cron expression: `minute hour day month weekday`.
#[derive(Debug, Clone)]
pub struct CronExpr {
    minute: CronField,
    hour: CronField,
    day: CronField,
    month: CronField,
    weekday: CronField,
}

impl CronExpr {
    /// Parses `"min hour day month weekday"`.
    pub fn parse(expr: &str) -> TandemResult<Self> {
        let parts: Vec<&str> = expr.split_whitespace().collect();
        if parts.len() != 5 {
            return Err(TandemError::Configuration(format!(
                "cron expression must have 5 fields: '{expr}'"
            )));
        }
        let field = |s: &str| {
            CronField::parse(s).ok_or_else(|| {
                TandemError::Configuration(format!("bad cron field '{s}' in '{expr}'"))
            })
        };
        Ok(Self {
            minute: field(parts[0])?,
            hour: field(parts[1])?,
            day: field(parts[2])?,
            month: field(parts[3])?,
            weekday: field(parts[4])?,
        })
    }

    /// Whether the expression matches the given instant.
    pub fn matches_at(&self, at: DateTime<Utc>) -> bool {
        self.minute.matches(at.minute())
            && self.hour.matches(at.hour())
            && self.day.matches(at.day())
            && self.month.matches(at.month())
            && self.weekday.matches(at.weekday().num_days_from_sunday())
    }
}

/// Stateful wrapper deciding when the worker thread fires.
///
/// Cron strategies fire at most once per matching minute; interval
/// strategies fire when the interval has elapsed since the last flush
/// (the countdown starts at construction, not with an immediate fire).
pub struct FlushClock {
    strategy: FlushStrategy,
    last_flush: Instant,
    last_cron_minute: Option<i64>,
}

impl FlushClock {
    pub fn new(strategy: FlushStrategy) -> Self {
        Self {
            strategy,
            last_flush: Instant::now(),
            last_cron_minute: None,
        }
    }

    /// Returns true when a flush cycle is due, recording the firing.
    pub fn should_fire(&mut self) -> bool {
        match &self.strategy {
            FlushStrategy::EveryTick => {
                self.last_flush = Instant::now();
                true
            }
            FlushStrategy::Interval(interval) => {
                let now = Instant::now();
                let due = now.duration_since(self.last_flush) >= *interval;
                if due {
                    self.last_flush = now;
                }
                due
            }
            FlushStrategy::Cron(expr) => {
                let now = Utc::now();
                let minute = now.timestamp() / 60;
                if self.last_cron_minute == Some(minute) {
                    return false;
                }
                if expr.matches_at(now) {
                    self.last_cron_minute = Some(minute);
                    self.last_flush = Instant::now();
                    true
                } else {
                    false
                }
            }
        }
    }
}
