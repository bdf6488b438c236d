//! Periodic countdown polling.
//!
//! Polls are scheduled off `Instant` deadlines so that wall-clock jumps do
//! not bunch or starve ticks. Wall-clock time comes from a [`Clock`] and is
//! only used to compare against the window boundary.

use std::ops::ControlFlow;
use std::sync::mpsc::{
  self,
  Receiver,
  RecvTimeoutError,
  Sender
};
use std::sync::{
  Arc,
  Mutex
};
use std::thread::{
  self,
  JoinHandle
};
use std::time::{
  Duration as StdDuration,
  Instant
};

use anyhow::{
  Context,
  anyhow
};
use chrono::{
  DateTime,
  Duration,
  Utc
};
use serde::Serialize;
use tracing::{
  debug,
  info,
  trace,
  warn
};

use crate::countdown::{
  Countdown,
  countdown
};
use crate::period::{
  Epoch,
  PeriodError,
  Range,
  current_range
};

const MIN_INTERVAL: StdDuration =
  StdDuration::from_millis(1);

pub trait Clock {
  fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> {
    Utc::now()
  }
}

/// Wall clock pinned to `origin` that then advances with the monotonic
/// clock.
#[derive(Debug, Clone, Copy)]
pub struct OffsetClock {
  origin:  DateTime<Utc>,
  started: Instant
}

impl OffsetClock {
  #[must_use]
  pub fn starting_at(
    origin: DateTime<Utc>
  ) -> Self {
    Self {
      origin,
      started: Instant::now()
    }
  }
}

impl Clock for OffsetClock {
  fn now(&self) -> DateTime<Utc> {
    let elapsed =
      Duration::from_std(
        self.started.elapsed()
      )
      .unwrap_or(Duration::MAX);
    self
      .origin
      .checked_add_signed(elapsed)
      .unwrap_or(self.origin)
  }
}

/// Clock moved by hand. Clones share the same reading.
#[derive(Debug, Clone)]
pub struct ManualClock {
  now: Arc<Mutex<DateTime<Utc>>>
}

impl ManualClock {
  #[must_use]
  pub fn new(
    now: DateTime<Utc>
  ) -> Self {
    Self {
      now: Arc::new(Mutex::new(now))
    }
  }

  pub fn set(
    &self,
    now: DateTime<Utc>
  ) {
    match self.now.lock() {
      | Ok(mut guard) => *guard = now,
      | Err(poisoned) => {
        *poisoned.into_inner() = now
      }
    }
  }

  pub fn advance(
    &self,
    by: Duration
  ) {
    let next = self.now() + by;
    self.set(next);
  }
}

impl Clock for ManualClock {
  fn now(&self) -> DateTime<Utc> {
    match self.now.lock() {
      | Ok(guard) => *guard,
      | Err(poisoned) => {
        *poisoned.into_inner()
      }
    }
  }
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize,
)]
pub struct Tick {
  pub now:         DateTime<Utc>,
  pub range:       Range,
  pub remaining:   Countdown,
  pub rolled_over: bool
}

/// The window currently on display, refreshed when a tick crosses its end.
#[derive(Debug, Clone)]
pub struct CountdownState {
  epoch: Epoch,
  range: Range
}

impl CountdownState {
  pub fn new(
    epoch: Epoch,
    now: DateTime<Utc>
  ) -> Result<Self, PeriodError> {
    Ok(Self {
      epoch,
      range: current_range(now, epoch)?
    })
  }

  #[must_use]
  pub fn range(&self) -> &Range {
    &self.range
  }

  pub fn tick(
    &mut self,
    now: DateTime<Utc>
  ) -> Result<Tick, PeriodError> {
    let mut rolled_over = false;

    if now >= self.range.closes_at() {
      let next =
        current_range(now, self.epoch)?;
      info!(
        from = self.range.cycle,
        to = next.cycle,
        start = %next.start,
        end = %next.end,
        "window rolled over"
      );
      self.range = next;
      rolled_over = true;
    } else if now < self.range.starts_at()
    {
      warn!(
        now = %now,
        start = %self.range.starts_at(),
        "wall clock moved behind current window; recomputing"
      );
      self.range =
        current_range(now, self.epoch)?;
    }

    Ok(Tick {
      now,
      range: self.range,
      remaining: countdown(
        now,
        self.range.closes_at()
      ),
      rolled_over
    })
  }
}

struct Schedule {
  interval: StdDuration,
  deadline: Instant
}

impl Schedule {
  fn new(interval: StdDuration) -> Self {
    Self {
      interval: interval
        .max(MIN_INTERVAL),
      deadline: Instant::now()
    }
  }

  fn next_delay(
    &mut self
  ) -> StdDuration {
    self.deadline += self.interval;
    let now = Instant::now();
    match self
      .deadline
      .checked_duration_since(now)
    {
      | Some(delay) => delay,
      | None => {
        trace!(
          "tick overran its slot; \
           resyncing schedule"
        );
        self.deadline = now;
        StdDuration::ZERO
      }
    }
  }
}

/// Polls `clock` every `interval` on the calling thread until `on_tick`
/// breaks.
pub fn run_watch<C, F>(
  clock: &C,
  state: &mut CountdownState,
  interval: StdDuration,
  mut on_tick: F
) -> Result<(), PeriodError>
where
  C: Clock + ?Sized,
  F: FnMut(&Tick) -> ControlFlow<()>
{
  let mut schedule =
    Schedule::new(interval);
  loop {
    let tick = state.tick(clock.now())?;
    if on_tick(&tick).is_break() {
      debug!("watch loop stopped");
      return Ok(());
    }
    thread::sleep(schedule.next_delay());
  }
}

/// Background countdown poll. Dropping the handle cancels the interval
/// and joins the worker.
#[derive(Debug)]
pub struct Watch {
  stop:   Option<Sender<()>>,
  handle:
    Option<JoinHandle<Result<(), PeriodError>>>
}

impl Watch {
  pub fn spawn<C>(
    clock: C,
    epoch: Epoch,
    interval: StdDuration
  ) -> anyhow::Result<(Self, Receiver<Tick>)>
  where
    C: Clock + Send + 'static
  {
    let mut state =
      CountdownState::new(epoch, clock.now())?;
    let (tick_tx, tick_rx) =
      mpsc::channel();
    let (stop_tx, stop_rx) =
      mpsc::channel::<()>();

    let handle = thread::Builder::new()
      .name("cadence-watch".to_string())
      .spawn(move || -> Result<(), PeriodError> {
        let mut schedule =
          Schedule::new(interval);
        loop {
          let tick =
            state.tick(clock.now())?;
          if tick_tx.send(tick).is_err() {
            debug!(
              "tick receiver dropped; \
               stopping watch"
            );
            return Ok(());
          }
          match stop_rx.recv_timeout(
            schedule.next_delay()
          ) {
            | Err(
              RecvTimeoutError::Timeout
            ) => {}
            | Ok(())
            | Err(
              RecvTimeoutError::Disconnected
            ) => {
              debug!("watch cancelled");
              return Ok(());
            }
          }
        }
      })
      .context(
        "failed to spawn watch thread"
      )?;

    info!(
      interval_ms = interval.as_millis() as u64,
      "started countdown watch"
    );

    Ok((
      Self {
        stop:   Some(stop_tx),
        handle: Some(handle)
      },
      tick_rx
    ))
  }

  /// Cancels the poll and surfaces any error the worker hit.
  pub fn stop(
    mut self
  ) -> anyhow::Result<()> {
    self.shutdown()
  }

  fn shutdown(
    &mut self
  ) -> anyhow::Result<()> {
    drop(self.stop.take());
    let Some(handle) = self.handle.take()
    else {
      return Ok(());
    };
    handle
      .join()
      .map_err(|_| {
        anyhow!("watch thread panicked")
      })??;
    Ok(())
  }
}

impl Drop for Watch {
  fn drop(&mut self) {
    if let Err(err) = self.shutdown() {
      warn!(error = %err, "watch ended with error");
    }
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration as StdDuration;

  use chrono::{
    Duration,
    NaiveDate
  };

  use super::*;

  fn epoch() -> Epoch {
    Epoch::from_date(
      NaiveDate::from_ymd_opt(
        2025, 7, 20
      )
      .expect("valid epoch date")
    )
  }

  #[test]
  fn tick_counts_down_to_window_close() {
    let now = epoch().instant()
      + Duration::days(13)
      + Duration::hours(22)
      + Duration::minutes(58)
      + Duration::seconds(59);
    let mut state =
      CountdownState::new(epoch(), now)
        .expect("state");

    let tick = state.tick(now).expect("tick");
    assert!(!tick.rolled_over);
    assert_eq!(tick.range.cycle, 0);
    assert_eq!(
      tick.remaining.to_string(),
      "0d 01h 01m 01s"
    );
  }

  #[test]
  fn tick_rolls_over_past_close() {
    let start = epoch().instant()
      + Duration::days(13);
    let mut state =
      CountdownState::new(epoch(), start)
        .expect("state");

    let tick = state
      .tick(start + Duration::days(1))
      .expect("tick");
    assert!(tick.rolled_over);
    assert_eq!(tick.range.cycle, 1);
    assert_eq!(state.range().cycle, 1);
    assert_eq!(
      tick.remaining.to_string(),
      "14d 00h 00m 00s"
    );
  }

  #[test]
  fn tick_recovers_from_clock_going_back() {
    let later = epoch().instant()
      + Duration::days(20);
    let mut state =
      CountdownState::new(epoch(), later)
        .expect("state");
    assert_eq!(state.range().cycle, 1);

    let tick = state
      .tick(epoch().instant() + Duration::days(2))
      .expect("tick");
    assert!(!tick.rolled_over);
    assert_eq!(tick.range.cycle, 0);
  }

  #[test]
  fn run_watch_stops_when_asked() {
    let clock = ManualClock::new(
      epoch().instant()
    );
    let mut state = CountdownState::new(
      epoch(),
      clock.now()
    )
    .expect("state");

    let mut seen = Vec::new();
    run_watch(
      &clock,
      &mut state,
      StdDuration::from_millis(1),
      |tick| {
        seen.push(*tick);
        clock.advance(Duration::days(5));
        if seen.len() == 4 {
          ControlFlow::Break(())
        } else {
          ControlFlow::Continue(())
        }
      }
    )
    .expect("watch loop");

    let cycles: Vec<u64> = seen
      .iter()
      .map(|tick| tick.range.cycle)
      .collect();
    assert_eq!(cycles, vec![0, 0, 0, 1]);
    assert!(seen[3].rolled_over);
  }

  #[test]
  fn watch_delivers_ticks_and_releases_on_drop() {
    let clock = ManualClock::new(
      epoch().instant()
        + Duration::days(14)
        - Duration::seconds(2)
    );
    let (watch, ticks) = Watch::spawn(
      clock.clone(),
      epoch(),
      StdDuration::from_millis(5)
    )
    .expect("spawn watch");

    let first = ticks
      .recv_timeout(StdDuration::from_secs(2))
      .expect("first tick");
    assert_eq!(first.range.cycle, 0);
    assert_eq!(first.remaining.seconds, 2);

    clock.advance(Duration::seconds(3));
    let rolled = ticks
      .iter()
      .find(|tick| tick.rolled_over)
      .expect("rollover tick");
    assert_eq!(rolled.range.cycle, 1);

    drop(watch);
    // Worker is joined by now: drain what it buffered, then the channel
    // must report the sender gone.
    let _buffered = ticks.try_iter().count();
    assert_eq!(
      ticks.recv_timeout(
        StdDuration::from_millis(50)
      ),
      Err(RecvTimeoutError::Disconnected)
    );
  }

  #[test]
  fn watch_rejects_clock_before_epoch() {
    let clock = ManualClock::new(
      epoch().instant()
        - Duration::days(1)
    );
    let err = Watch::spawn(
      clock,
      epoch(),
      StdDuration::from_millis(5)
    )
    .expect_err("before epoch");
    assert!(
      err
        .downcast_ref::<PeriodError>()
        .is_some()
    );
  }
}
