//! Wager leaderboard query windows and response ranking.
//!
//! Transport is left to the caller: this module builds the request URL and
//! ranks a response body it is handed.

use std::fmt;
use std::str::FromStr;

use anyhow::{
  Context,
  anyhow
};
use chrono::{
  DateTime,
  Datelike,
  Duration,
  NaiveDate,
  Utc
};
use serde::{
  Deserialize,
  Serialize
};
use serde_json::Value;
use thiserror::Error;
use tracing::{
  debug,
  warn
};
use url::Url;

use crate::datetime::format_query_date;
use crate::period::{
  Epoch,
  PeriodError,
  current_range
};

const PRIZES: [(u32, u32); 4] =
  [(1, 100), (2, 50), (3, 30), (4, 20)];

#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum LeaderboardPeriod {
  Weekly,
  #[default]
  Biweekly,
  Monthly
}

impl FromStr for LeaderboardPeriod {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    match s
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "weekly" => Ok(Self::Weekly),
      | "biweekly" => Ok(Self::Biweekly),
      | "monthly" => Ok(Self::Monthly),
      | other => {
        Err(anyhow!(
          "unknown leaderboard period: \
           {other} (expected weekly, \
           biweekly or monthly)"
        ))
      }
    }
  }
}

impl fmt::Display for LeaderboardPeriod {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    let name = match self {
      | Self::Weekly => "weekly",
      | Self::Biweekly => "biweekly",
      | Self::Monthly => "monthly"
    };
    f.write_str(name)
  }
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize,
)]
pub struct QueryWindow {
  pub start_at: NaiveDate,
  pub end_at:   NaiveDate
}

impl QueryWindow {
  pub fn request_url(
    &self,
    base: &str
  ) -> anyhow::Result<Url> {
    let mut url = Url::parse(base)
      .with_context(|| {
        format!(
          "invalid leaderboard api \
           url: {base}"
        )
      })?;
    url
      .query_pairs_mut()
      .append_pair(
        "start_at",
        &format_query_date(self.start_at)
      )
      .append_pair(
        "end_at",
        &format_query_date(self.end_at)
      );
    Ok(url)
  }
}

/// Calendar days to request for `period`. Biweekly follows the
/// epoch-anchored window; the others trail `now`.
#[tracing::instrument(level = "debug", skip(epoch))]
pub fn query_window(
  period: LeaderboardPeriod,
  now: DateTime<Utc>,
  epoch: Epoch
) -> Result<QueryWindow, PeriodError> {
  let today = now.date_naive();
  let window = match period {
    | LeaderboardPeriod::Weekly => {
      QueryWindow {
        start_at: (now
          - Duration::days(7))
        .date_naive(),
        end_at:   today
      }
    }
    | LeaderboardPeriod::Monthly => {
      QueryWindow {
        start_at: today
          .with_day(1)
          .unwrap_or(today),
        end_at:   today
      }
    }
    | LeaderboardPeriod::Biweekly => {
      let range =
        current_range(now, epoch)?;
      QueryWindow {
        start_at: range.start,
        end_at:   range.end
      }
    }
  };
  debug!(
    start_at = %window.start_at,
    end_at = %window.end_at,
    "resolved query window"
  );
  Ok(window)
}

#[derive(Debug, Error)]
pub enum LeaderboardError {
  #[error(
    "response body is not valid \
     JSON: {0}"
  )]
  Json(#[from] serde_json::Error)
}

#[derive(
  Debug, Clone, PartialEq, Serialize,
)]
pub struct Player {
  pub rank:     u32,
  pub username: String,
  pub wager:    f64,
  pub featured: bool
}

impl Player {
  #[must_use]
  pub fn prize(&self) -> Option<u32> {
    prize_for(self.rank)
  }
}

#[must_use]
pub fn prize_for(
  rank: u32
) -> Option<u32> {
  PRIZES
    .iter()
    .find(|(r, _)| *r == rank)
    .map(|(_, amount)| *amount)
}

pub fn parse_players(
  raw: &str,
  featured_tag: &str
) -> Result<Vec<Player>, LeaderboardError> {
  let body: Value =
    serde_json::from_str(raw)?;
  rank_players(&body, featured_tag)
}

/// Orders affiliates by wager, highest first, and numbers them from 1.
pub fn rank_players(
  body: &Value,
  featured_tag: &str
) -> Result<Vec<Player>, LeaderboardError> {
  let Some(affiliates) = body
    .get("affiliates")
    .and_then(Value::as_array)
  else {
    warn!(
      "response has no affiliates \
       array; nothing to rank"
    );
    return Ok(vec![]);
  };

  let tag =
    featured_tag.trim().to_lowercase();
  let mut players: Vec<Player> =
    affiliates
      .iter()
      .filter_map(|item| {
        let username = item
          .get("username")
          .and_then(username_text);
        if username.is_none() {
          warn!(entry = %item, "skipping affiliate without username");
        }
        let username = username?;
        let featured = !tag.is_empty()
          && username
            .to_lowercase()
            .contains(&tag);
        Some(Player {
          rank: 0,
          username,
          wager: parse_wager(
            item.get("wagered_amount")
          ),
          featured
        })
      })
      .collect();

  players.sort_by(|a, b| {
    b.wager.total_cmp(&a.wager)
  });
  for (idx, player) in
    players.iter_mut().enumerate()
  {
    player.rank = idx as u32 + 1;
  }

  debug!(
    count = players.len(),
    "ranked leaderboard"
  );
  Ok(players)
}

/// Non-empty strings and non-zero numbers count as a username.
fn username_text(
  raw: &Value
) -> Option<String> {
  match raw {
    | Value::String(s)
      if !s.is_empty() =>
    {
      Some(s.clone())
    }
    | Value::Number(n)
      if n.as_f64() != Some(0.0) =>
    {
      Some(n.to_string())
    }
    | _ => None
  }
}

fn parse_wager(
  raw: Option<&Value>
) -> f64 {
  let parsed = match raw {
    | Some(Value::Number(n)) => n.as_f64(),
    | Some(Value::String(s)) => {
      s.trim().parse::<f64>().ok()
    }
    | _ => None
  };
  parsed
    .filter(|value| value.is_finite())
    .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
  use chrono::{
    TimeZone,
    Utc
  };
  use serde_json::json;

  use super::*;

  fn epoch() -> Epoch {
    "2025-07-20".parse().expect("epoch")
  }

  fn now() -> DateTime<Utc> {
    Utc
      .with_ymd_and_hms(
        2025, 8, 5, 9, 0, 0
      )
      .single()
      .expect("valid now")
  }

  #[test]
  fn biweekly_window_follows_epoch() {
    let window = query_window(
      LeaderboardPeriod::Biweekly,
      now(),
      epoch()
    )
    .expect("window");
    let url = window
      .request_url(
        "http://localhost:3000/api/affiliates"
      )
      .expect("url");
    assert_eq!(
      url.as_str(),
      "http://localhost:3000/api/affiliates\
       ?start_at=2025-08-03&end_at=2025-08-16"
    );
  }

  #[test]
  fn trailing_windows() {
    let weekly = query_window(
      LeaderboardPeriod::Weekly,
      now(),
      epoch()
    )
    .expect("weekly");
    assert_eq!(
      format_query_date(weekly.start_at),
      "2025-07-29"
    );
    assert_eq!(
      format_query_date(weekly.end_at),
      "2025-08-05"
    );

    let monthly = query_window(
      LeaderboardPeriod::Monthly,
      now(),
      epoch()
    )
    .expect("monthly");
    assert_eq!(
      format_query_date(monthly.start_at),
      "2025-08-01"
    );
  }

  #[test]
  fn ranks_by_wager_and_flags_featured() {
    let body = json!({
      "affiliates": [
        { "username": "alice", "wagered_amount": "1500.25" },
        { "username": "5MOKING_alt", "wagered_amount": 9000 },
        { "wagered_amount": "12" },
        { "username": "bob", "wagered_amount": "n/a" },
        { "username": "carol", "wagered_amount": 300 }
      ]
    });

    let players = rank_players(&body, "5moking")
      .expect("rank");
    let names: Vec<&str> = players
      .iter()
      .map(|p| p.username.as_str())
      .collect();
    assert_eq!(
      names,
      vec!["5MOKING_alt", "alice", "carol", "bob"]
    );
    assert_eq!(players[0].rank, 1);
    assert!(players[0].featured);
    assert!(!players[1].featured);
    assert_eq!(players[3].wager, 0.0);
    assert_eq!(players[3].rank, 4);
    assert_eq!(players[0].prize(), Some(100));
    assert_eq!(players[3].prize(), Some(20));
  }

  #[test]
  fn missing_affiliates_ranks_nobody() {
    assert!(
      parse_players("{\"data\": []}", "x")
        .expect("body without affiliates")
        .is_empty()
    );
    assert!(
      parse_players("[1, 2]", "x")
        .expect("array body")
        .is_empty()
    );
    assert!(matches!(
      parse_players("not json", "x"),
      Err(LeaderboardError::Json(_))
    ));
  }

  #[test]
  fn numeric_usernames_are_kept() {
    let body = json!({
      "affiliates": [
        { "username": 1337, "wagered_amount": "40" },
        { "username": 0, "wagered_amount": "90" },
        { "username": "", "wagered_amount": "80" },
        { "username": null, "wagered_amount": "70" },
        { "username": "eve", "wagered_amount": "10" }
      ]
    });

    let players = rank_players(&body, "")
      .expect("rank");
    let names: Vec<&str> = players
      .iter()
      .map(|p| p.username.as_str())
      .collect();
    assert_eq!(names, vec!["1337", "eve"]);
    assert_eq!(players[0].wager, 40.0);
  }

  #[test]
  fn prize_table() {
    assert_eq!(prize_for(2), Some(50));
    assert_eq!(prize_for(3), Some(30));
    assert_eq!(prize_for(5), None);
    assert_eq!(prize_for(0), None);
  }

  #[test]
  fn parses_period_names() {
    assert_eq!(
      "Monthly"
        .parse::<LeaderboardPeriod>()
        .expect("period"),
      LeaderboardPeriod::Monthly
    );
    assert!(
      "daily"
        .parse::<LeaderboardPeriod>()
        .is_err()
    );
  }
}
