//! Five-field cron expressions with minute resolution.
//!
//! Field parsing and the occurrence search are delegated to `croner`, which
//! accepts `*`, lists, ranges, steps, month and weekday names and weekday `7`
//! as Sunday, and ORs day-of-month with day-of-week when both are
//! restricted. The `@hourly`-style macros and the DST policy live here.

use chrono::{DateTime, Duration, LocalResult, TimeZone, Utc};
use chrono_tz::Tz;
use croner::Cron;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Occurrences rejected by the DST policy before giving up.
const DST_SKIP_LIMIT: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CronError {
    #[error("expected 5 fields (minute hour day-of-month month day-of-week), got {0}")]
    FieldCount(usize),

    #[error("invalid cron expression '{expression}': {reason}")]
    Invalid { expression: String, reason: String },

    #[error("unknown macro '{0}'")]
    UnknownMacro(String),

    #[error("unknown timezone '{0}'")]
    UnknownTimezone(String),
}

fn expand_macro(text: &str) -> Result<&'static str, CronError> {
    match text.to_ascii_lowercase().as_str() {
        "@yearly" | "@annually" => Ok("0 0 1 1 *"),
        "@monthly" => Ok("0 0 1 * *"),
        "@weekly" => Ok("0 0 * * 0"),
        "@daily" | "@midnight" => Ok("0 0 * * *"),
        "@hourly" => Ok("0 * * * *"),
        _ => Err(CronError::UnknownMacro(text.to_string())),
    }
}

/// A parsed cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    source: String,
    /// Normalized five-field pattern handed to `croner`
    pattern: String,
}

impl FromStr for CronExpr {
    type Err = CronError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        Self::parse(text)
    }
}

impl fmt::Display for CronExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl CronExpr {
    pub fn parse(text: &str) -> Result<Self, CronError> {
        let source = text.trim();
        let expanded = if source.starts_with('@') {
            expand_macro(source)?
        } else {
            source
        };

        let fields: Vec<&str> = expanded.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(CronError::FieldCount(fields.len()));
        }
        let pattern = fields.join(" ").to_ascii_uppercase();
        compile(&pattern).map_err(|reason| CronError::Invalid {
            expression: source.to_string(),
            reason,
        })?;

        Ok(Self {
            source: source.to_string(),
            pattern,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// First firing strictly after `after`, evaluated as wall-clock time in
    /// `tz`. Local times skipped by a DST jump never fire; local times
    /// repeated by a DST fallback fire on their first occurrence only.
    pub fn next_after<Z: TimeZone>(&self, after: DateTime<Utc>, tz: &Z) -> Option<DateTime<Utc>> {
        let cron = compile(&self.pattern).ok()?;
        let mut cursor = after.with_timezone(tz);
        for _ in 0..DST_SKIP_LIMIT {
            let candidate = cron.find_next_occurrence(&cursor, false).ok()?;
            // A time pushed out of a DST gap no longer reads as a match.
            if !cron.is_time_matching(&candidate).unwrap_or(false) {
                cursor = candidate;
                continue;
            }
            let earliest = match tz.from_local_datetime(&candidate.naive_local()) {
                LocalResult::Ambiguous(earliest, _) => earliest,
                _ => candidate.clone(),
            };
            let earliest = earliest.with_timezone(&Utc);
            if earliest > after {
                return Some(earliest);
            }
            cursor = candidate;
        }
        None
    }

    /// First firing at or after `at`.
    pub fn next_at_or_after<Z: TimeZone>(
        &self,
        at: DateTime<Utc>,
        tz: &Z,
    ) -> Option<DateTime<Utc>> {
        self.next_after(at - Duration::nanoseconds(1), tz)
    }

    /// The next `count` firings strictly after `after`.
    pub fn preview<Z: TimeZone>(
        &self,
        after: DateTime<Utc>,
        tz: &Z,
        count: usize,
    ) -> Vec<DateTime<Utc>> {
        let mut upcoming = Vec::with_capacity(count);
        let mut cursor = after;
        while upcoming.len() < count {
            let Some(next) = self.next_after(cursor, tz) else {
                break;
            };
            upcoming.push(next);
            cursor = next;
        }
        upcoming
    }
}

/// Zone a schedule's expression is evaluated in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScheduleTimezone {
    /// The host's local zone
    Local,
    Named(Tz),
}

impl ScheduleTimezone {
    pub fn parse(name: &str) -> Result<Self, CronError> {
        if name.eq_ignore_ascii_case("local") {
            return Ok(ScheduleTimezone::Local);
        }
        name.parse::<Tz>()
            .map(ScheduleTimezone::Named)
            .map_err(|_| CronError::UnknownTimezone(name.to_string()))
    }

    pub fn next_after(&self, expr: &CronExpr, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            ScheduleTimezone::Local => expr.next_after(after, &chrono::Local),
            ScheduleTimezone::Named(tz) => expr.next_after(after, tz),
        }
    }

    pub fn next_at_or_after(&self, expr: &CronExpr, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            ScheduleTimezone::Local => expr.next_at_or_after(at, &chrono::Local),
            ScheduleTimezone::Named(tz) => expr.next_at_or_after(at, tz),
        }
    }

    pub fn preview(&self, expr: &CronExpr, after: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        match self {
            ScheduleTimezone::Local => expr.preview(after, &chrono::Local, count),
            ScheduleTimezone::Named(tz) => expr.preview(after, tz, count),
        }
    }
}

fn compile(pattern: &str) -> Result<Cron, String> {
    Cron::new(pattern).parse().map_err(|err| err.to_string())
}
