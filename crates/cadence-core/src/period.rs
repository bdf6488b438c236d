//! Biweekly reporting windows anchored at a fixed epoch.
//!
//! Time since the epoch is cut into consecutive 14-day cycles. Cycle `n`
//! starts on `epoch + n * 14` days and its last calendar day is thirteen
//! days later. All arithmetic is done in UTC.

use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{
  DateTime,
  Days,
  Duration,
  NaiveDate,
  NaiveTime,
  Utc
};
use serde::Serialize;
use thiserror::Error;
use tracing::trace;

pub const CYCLE_DAYS: u64 = 14;
pub const DEFAULT_EPOCH: &str =
  "2025-07-20";

const MILLIS_PER_DAY: i64 = 86_400_000;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PeriodError {
  #[error(
    "invalid input: {now} precedes \
     epoch {epoch}"
  )]
  InvalidInput {
    now:   DateTime<Utc>,
    epoch: DateTime<Utc>
  },

  #[error(
    "cycle {cycle} is outside the \
     representable calendar"
  )]
  OutOfRange { cycle: u64 }
}

/// Start of cycle 0, normalized to a UTC calendar day boundary.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
pub struct Epoch(NaiveDate);

impl Epoch {
  #[must_use]
  pub fn from_date(
    date: NaiveDate
  ) -> Self {
    Self(date)
  }

  /// Truncates `instant` to the start of its UTC day.
  #[must_use]
  pub fn from_instant(
    instant: DateTime<Utc>
  ) -> Self {
    Self(instant.date_naive())
  }

  #[must_use]
  pub fn date(&self) -> NaiveDate {
    self.0
  }

  #[must_use]
  pub fn instant(
    &self
  ) -> DateTime<Utc> {
    midnight_utc(self.0)
  }
}

impl fmt::Display for Epoch {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    write!(f, "{}", self.0.format("%Y-%m-%d"))
  }
}

impl FromStr for Epoch {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    let token = s.trim();
    if let Ok(date) =
      NaiveDate::parse_from_str(
        token, "%Y-%m-%d"
      )
    {
      return Ok(Self::from_date(date));
    }

    if let Ok(dt) =
      DateTime::parse_from_rfc3339(token)
    {
      return Ok(Self::from_instant(
        dt.with_timezone(&Utc)
      ));
    }

    Err(anyhow!(
      "invalid epoch '{token}': \
       expected YYYY-MM-DD or RFC3339"
    ))
  }
}

/// One 14-day window. `end` is the last calendar day of the window.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
)]
pub struct Range {
  pub cycle: u64,
  pub start: NaiveDate,
  pub end:   NaiveDate
}

impl Range {
  #[must_use]
  pub fn starts_at(
    &self
  ) -> DateTime<Utc> {
    midnight_utc(self.start)
  }

  /// First instant after the window; the next range opens here.
  /// Saturates at the last representable instant.
  #[must_use]
  pub fn closes_at(
    &self
  ) -> DateTime<Utc> {
    midnight_utc(self.end)
      .checked_add_signed(Duration::days(1))
      .unwrap_or(DateTime::<Utc>::MAX_UTC)
  }

  #[must_use]
  pub fn contains(
    &self,
    now: DateTime<Utc>
  ) -> bool {
    self.starts_at() <= now
      && now < self.closes_at()
  }

  #[must_use]
  pub fn start_param(&self) -> String {
    self.start.format("%Y-%m-%d").to_string()
  }

  #[must_use]
  pub fn end_param(&self) -> String {
    self.end.format("%Y-%m-%d").to_string()
  }
}

fn midnight_utc(
  date: NaiveDate
) -> DateTime<Utc> {
  date.and_time(NaiveTime::MIN).and_utc()
}

/// Zero-based index of the window containing `now`.
pub fn cycle_at(
  now: DateTime<Utc>,
  epoch: Epoch
) -> Result<u64, PeriodError> {
  let elapsed = (now - epoch.instant())
    .num_milliseconds();
  if elapsed < 0 {
    return Err(
      PeriodError::InvalidInput {
        now,
        epoch: epoch.instant()
      }
    );
  }

  let days_since_start =
    elapsed.div_euclid(MILLIS_PER_DAY);
  let cycle = days_since_start as u64
    / CYCLE_DAYS;
  trace!(
    days_since_start,
    cycle,
    "computed cycle"
  );
  Ok(cycle)
}

pub fn range_for_cycle(
  epoch: Epoch,
  cycle: u64
) -> Result<Range, PeriodError> {
  let offset = cycle
    .checked_mul(CYCLE_DAYS)
    .ok_or(PeriodError::OutOfRange {
      cycle
    })?;
  let start = epoch
    .date()
    .checked_add_days(Days::new(offset))
    .ok_or(PeriodError::OutOfRange {
      cycle
    })?;
  let end = start
    .checked_add_days(Days::new(
      CYCLE_DAYS - 1
    ))
    .ok_or(PeriodError::OutOfRange {
      cycle
    })?;

  Ok(Range {
    cycle,
    start,
    end
  })
}

#[tracing::instrument(level = "debug", fields(epoch = %epoch))]
pub fn current_range(
  now: DateTime<Utc>,
  epoch: Epoch
) -> Result<Range, PeriodError> {
  let cycle = cycle_at(now, epoch)?;
  range_for_cycle(epoch, cycle)
}

/// The window before the current one, or `None` while `now` is still in
/// cycle 0.
#[tracing::instrument(level = "debug", fields(epoch = %epoch))]
pub fn previous_range(
  now: DateTime<Utc>,
  epoch: Epoch
) -> Result<Option<Range>, PeriodError> {
  match cycle_at(now, epoch)? {
    | 0 => {
      trace!(
        "no window precedes cycle 0"
      );
      Ok(None)
    }
    | cycle => {
      range_for_cycle(epoch, cycle - 1)
        .map(Some)
    }
  }
}
