use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono_tz::Tz;
use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::datetime::{format_display_datetime, resolve_display_timezone};
use crate::leaderboard::{LeaderboardPeriod, Player};
use crate::period::Range;
use crate::watch::Tick;

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
    timezone: Tz,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => true,
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };
        let timezone = resolve_display_timezone(cfg.get("timezone").as_deref());

        Ok(Self { color, timezone })
    }

    pub fn with_timezone(color: bool, timezone: Tz) -> Self {
        Self { color, timezone }
    }

    #[tracing::instrument(skip(self, range), fields(cycle = range.cycle))]
    pub fn print_range(&mut self, range: &Range) -> anyhow::Result<()> {
        let out = io::stdout().lock();
        self.write_range(out, range)
    }

    pub fn write_range<W: Write>(&self, mut out: W, range: &Range) -> anyhow::Result<()> {
        writeln!(out, "cycle     {}", range.cycle)?;
        writeln!(out, "start     {}", range.start_param())?;
        writeln!(out, "end       {}", range.end_param())?;
        writeln!(
            out,
            "opens     {}",
            format_display_datetime(range.starts_at(), &self.timezone)
        )?;
        writeln!(
            out,
            "closes    {}",
            format_display_datetime(range.closes_at(), &self.timezone)
        )?;
        Ok(())
    }

    pub fn print_countdown(&mut self, tick: &Tick) -> anyhow::Result<()> {
        let out = io::stdout().lock();
        self.write_countdown(out, tick)
    }

    pub fn write_countdown<W: Write>(&self, mut out: W, tick: &Tick) -> anyhow::Result<()> {
        let remaining = tick.remaining.to_string();
        let remaining = if tick.rolled_over {
            self.paint(&remaining, "32")
        } else {
            remaining
        };
        writeln!(
            out,
            "{remaining} until {}",
            format_display_datetime(tick.range.closes_at(), &self.timezone)
        )?;
        Ok(())
    }

    #[tracing::instrument(skip(self, players), fields(count = players.len()))]
    pub fn print_leaderboard(
        &mut self,
        period: LeaderboardPeriod,
        players: &[Player],
    ) -> anyhow::Result<()> {
        let out = io::stdout().lock();
        self.write_leaderboard(out, period, players)
    }

    pub fn write_leaderboard<W: Write>(
        &self,
        mut out: W,
        period: LeaderboardPeriod,
        players: &[Player],
    ) -> anyhow::Result<()> {
        if players.is_empty() {
            writeln!(out, "No leaderboard data available for {period}.")?;
            return Ok(());
        }

        let headers = vec![
            "Rank".to_string(),
            "Player".to_string(),
            "Wager".to_string(),
            "Prize".to_string(),
        ];

        let mut rows = Vec::with_capacity(players.len());
        for player in players {
            let rank = player.rank.to_string();
            let rank = if player.rank <= 3 {
                self.paint(&rank, "33")
            } else {
                rank
            };

            let username = if player.featured {
                self.paint(&format!("{} [streamer]", player.username), "35")
            } else {
                player.username.clone()
            };

            let prize = player
                .prize()
                .map(|amount| format!("${amount}"))
                .unwrap_or_else(|| "-".to_string());

            rows.push(vec![rank, username, format_wager(player.wager), prize]);
        }

        write_table(&mut out, headers, rows)?;
        Ok(())
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color || !io::stdout().is_terminal() {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

/// `$` amount with thousands separators and two decimals.
pub fn format_wager(amount: f64) -> String {
    let cents = (amount.max(0.0) * 100.0).round() as u64;
    let whole = (cents / 100).to_string();
    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (idx, ch) in whole.chars().enumerate() {
        if idx > 0 && (whole.len() - idx) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    format!("${grouped}.{:02}", cents % 100)
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for idx in 0..column_count {
        write!(writer, "{:width$} ", headers[idx], width = widths[idx])?;
    }
    writeln!(writer)?;

    for idx in 0..column_count {
        write!(writer, "{:-<width$} ", "", width = widths[idx])?;
    }
    writeln!(writer)?;

    for row in rows {
        for idx in 0..column_count {
            let cell = &row[idx];
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::period::{Epoch, range_for_cycle};
    use crate::watch::CountdownState;

    fn renderer() -> Renderer {
        Renderer::with_timezone(false, chrono_tz::America::New_York)
    }

    fn epoch() -> Epoch {
        Epoch::from_date(NaiveDate::from_ymd_opt(2025, 7, 20).expect("valid epoch date"))
    }

    #[test]
    fn range_block_lists_dates_and_local_times() {
        let range = range_for_cycle(epoch(), 1).expect("range");
        let mut buf = Vec::new();
        renderer().write_range(&mut buf, &range).expect("write range");
        let text = String::from_utf8(buf).expect("utf8");

        assert!(text.contains("cycle     1\n"));
        assert!(text.contains("start     2025-08-03\n"));
        assert!(text.contains("end       2025-08-16\n"));
        assert!(text.contains("opens     2025-08-02 20:00 EDT\n"));
        assert!(text.contains("closes    2025-08-16 20:00 EDT\n"));
    }

    #[test]
    fn countdown_line() {
        let now = epoch().instant() + chrono::Duration::milliseconds(14 * 86_400_000 - 90_061_000);
        let mut state = CountdownState::new(epoch(), now).expect("state");
        let tick = state.tick(now).expect("tick");

        let mut buf = Vec::new();
        renderer().write_countdown(&mut buf, &tick).expect("write countdown");
        assert_eq!(
            String::from_utf8(buf).expect("utf8"),
            "1d 01h 01m 01s until 2025-08-02 20:00 EDT\n"
        );
    }

    #[test]
    fn leaderboard_table_and_empty_state() {
        let players = vec![
            Player {
                rank: 1,
                username: "5moking".to_string(),
                wager: 12_345.5,
                featured: true,
            },
            Player {
                rank: 5,
                username: "dana".to_string(),
                wager: 10.0,
                featured: false,
            },
        ];

        let mut buf = Vec::new();
        renderer()
            .write_leaderboard(&mut buf, LeaderboardPeriod::Biweekly, &players)
            .expect("write table");
        let text = String::from_utf8(buf).expect("utf8");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("Rank Player"));
        assert!(lines[2].contains("5moking [streamer]"));
        assert!(lines[2].contains("$12,345.50"));
        assert!(lines[2].contains("$100"));
        assert!(lines[3].trim_end().ends_with('-'));

        let mut empty = Vec::new();
        renderer()
            .write_leaderboard(&mut empty, LeaderboardPeriod::Weekly, &[])
            .expect("write empty");
        assert_eq!(
            String::from_utf8(empty).expect("utf8"),
            "No leaderboard data available for weekly.\n"
        );
    }

    #[test]
    fn wager_formatting() {
        assert_eq!(format_wager(0.0), "$0.00");
        assert_eq!(format_wager(999.999), "$1,000.00");
        assert_eq!(format_wager(1_234_567.1), "$1,234,567.10");
    }
}
