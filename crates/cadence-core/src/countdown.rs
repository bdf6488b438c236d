use std::fmt;

use chrono::{
  DateTime,
  Utc
};
use serde::Serialize;

const SECS_PER_MINUTE: u64 = 60;
const SECS_PER_HOUR: u64 = 3_600;
const SECS_PER_DAY: u64 = 86_400;

/// Remaining time split into whole units. Every unit is floored.
#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  Serialize,
)]
pub struct Countdown {
  pub days:    u64,
  pub hours:   u8,
  pub minutes: u8,
  pub seconds: u8
}

impl Countdown {
  #[must_use]
  pub fn from_millis(
    millis: i64
  ) -> Self {
    let total =
      millis.max(0) as u64 / 1_000;
    Self {
      days:    total / SECS_PER_DAY,
      hours:   ((total % SECS_PER_DAY)
        / SECS_PER_HOUR)
        as u8,
      minutes: ((total % SECS_PER_HOUR)
        / SECS_PER_MINUTE)
        as u8,
      seconds: (total % SECS_PER_MINUTE)
        as u8
    }
  }

  #[must_use]
  pub fn is_zero(&self) -> bool {
    *self == Self::default()
  }

  #[must_use]
  pub fn total_seconds(&self) -> u64 {
    self.days * SECS_PER_DAY
      + u64::from(self.hours)
        * SECS_PER_HOUR
      + u64::from(self.minutes)
        * SECS_PER_MINUTE
      + u64::from(self.seconds)
  }
}

impl fmt::Display for Countdown {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    write!(
      f,
      "{}d {:02}h {:02}m {:02}s",
      self.days,
      self.hours,
      self.minutes,
      self.seconds
    )
  }
}

/// Time left until `end`, clamped at zero once `end` has passed.
#[must_use]
pub fn countdown(
  now: DateTime<Utc>,
  end: DateTime<Utc>
) -> Countdown {
  Countdown::from_millis(
    (end - now).num_milliseconds()
  )
}

#[cfg(test)]
mod tests {
  use chrono::{
    Duration,
    TimeZone,
    Utc
  };

  use super::*;

  #[test]
  fn decomposes_and_pads() {
    let cd = Countdown::from_millis(
      90_061_000
    );
    assert_eq!(
      cd,
      Countdown {
        days:    1,
        hours:   1,
        minutes: 1,
        seconds: 1
      }
    );
    assert_eq!(
      cd.to_string(),
      "1d 01h 01m 01s"
    );
    assert_eq!(cd.total_seconds(), 90_061);
  }

  #[test]
  fn floors_partial_seconds() {
    let cd = Countdown::from_millis(
      59_999
    );
    assert_eq!(cd.seconds, 59);
    assert_eq!(cd.minutes, 0);
    assert_eq!(
      cd.to_string(),
      "0d 00h 00m 59s"
    );
  }

  #[test]
  fn zero_at_and_after_end() {
    let end = Utc
      .with_ymd_and_hms(
        2025, 8, 3, 0, 0, 0
      )
      .single()
      .expect("valid end");

    assert!(countdown(end, end).is_zero());
    assert!(
      countdown(
        end + Duration::minutes(5),
        end
      )
      .is_zero()
    );
  }

  #[test]
  fn full_window_is_fourteen_days() {
    let now = Utc
      .with_ymd_and_hms(
        2025, 7, 20, 0, 0, 0
      )
      .single()
      .expect("valid now");
    let cd = countdown(
      now,
      now + Duration::days(14)
    );
    assert_eq!(
      cd.to_string(),
      "14d 00h 00m 00s"
    );
  }
}
