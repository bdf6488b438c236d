use std::fs;
use std::io::{self, Read};
use std::ops::ControlFlow;
use std::path::Path;

use anyhow::{Context, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::cli::Command;
use crate::config::Config;
use crate::leaderboard::{LeaderboardPeriod, parse_players, query_window};
use crate::period::{current_range, previous_range};
use crate::render::Renderer;
use crate::watch::{Clock, CountdownState, run_watch};

#[instrument(skip(cfg, renderer, clock))]
pub fn dispatch(
    cfg: &Config,
    renderer: &mut Renderer,
    command: Command,
    clock: &dyn Clock,
) -> anyhow::Result<()> {
    debug!(?command, "dispatching command");

    match command {
        Command::Range { previous, json } => cmd_range(cfg, renderer, clock, previous, json),
        Command::Countdown { watch, ticks } => cmd_countdown(cfg, renderer, clock, watch, ticks),
        Command::Query { period } => cmd_query(cfg, clock, period.as_deref()),
        Command::Rank { file, period } => {
            cmd_rank(cfg, renderer, file.as_deref(), period.as_deref())
        }
        Command::Show => cmd_show(cfg),
        Command::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

#[instrument(skip(cfg, renderer, clock))]
fn cmd_range(
    cfg: &Config,
    renderer: &mut Renderer,
    clock: &dyn Clock,
    previous: bool,
    json: bool,
) -> anyhow::Result<()> {
    info!("command range");

    let epoch = cfg.epoch()?;
    let now = clock.now();

    let range = if previous {
        match previous_range(now, epoch)? {
            Some(range) => range,
            None => {
                warn!(%now, %epoch, "no previous window before the first cycle");
                println!("no previous window: {now} falls in the first cycle since {epoch}");
                return Ok(());
            }
        }
    } else {
        current_range(now, epoch)?
    };

    if json {
        let text = serde_json::to_string_pretty(&range).context("failed to serialize range")?;
        println!("{text}");
        return Ok(());
    }

    renderer.print_range(&range)
}

#[instrument(skip(cfg, renderer, clock))]
fn cmd_countdown(
    cfg: &Config,
    renderer: &mut Renderer,
    clock: &dyn Clock,
    watch: bool,
    ticks: Option<u64>,
) -> anyhow::Result<()> {
    info!("command countdown");

    let epoch = cfg.epoch()?;
    let mut state = CountdownState::new(epoch, clock.now())?;

    if !watch {
        let tick = state.tick(clock.now())?;
        return renderer.print_countdown(&tick);
    }

    if ticks == Some(0) {
        return Err(anyhow!("--ticks must be at least 1"));
    }

    let interval = cfg.watch_interval()?;
    let mut printed: u64 = 0;
    let mut print_err: Option<anyhow::Error> = None;

    run_watch(clock, &mut state, interval, |tick| {
        if let Err(err) = renderer.print_countdown(tick) {
            print_err = Some(err);
            return ControlFlow::Break(());
        }
        printed += 1;
        match ticks {
            Some(limit) if printed >= limit => ControlFlow::Break(()),
            _ => ControlFlow::Continue(()),
        }
    })?;

    match print_err {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn resolve_period(cfg: &Config, explicit: Option<&str>) -> anyhow::Result<LeaderboardPeriod> {
    match explicit {
        Some(raw) => raw.parse(),
        None => cfg.leaderboard_period(),
    }
}

#[instrument(skip(cfg, clock))]
fn cmd_query(cfg: &Config, clock: &dyn Clock, period: Option<&str>) -> anyhow::Result<()> {
    info!("command query");

    let period = resolve_period(cfg, period)?;
    let epoch = cfg.epoch()?;
    let base = cfg
        .get("api.url")
        .ok_or_else(|| anyhow!("missing config key: api.url"))?;

    let window = query_window(period, clock.now(), epoch)?;
    let url = window.request_url(&base)?;
    println!("{url}");
    Ok(())
}

#[instrument(skip(cfg, renderer))]
fn cmd_rank(
    cfg: &Config,
    renderer: &mut Renderer,
    file: Option<&Path>,
    period: Option<&str>,
) -> anyhow::Result<()> {
    info!("command rank");

    let period = resolve_period(cfg, period)?;
    let featured = cfg.get("leaderboard.featured").unwrap_or_default();

    let body = match file {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => {
            let mut input = String::new();
            io::stdin()
                .read_to_string(&mut input)
                .context("failed to read leaderboard body from stdin")?;
            input
        }
    };

    let players = parse_players(&body, &featured).context("failed to rank leaderboard")?;
    renderer.print_leaderboard(period, &players)
}

fn cmd_show(cfg: &Config) -> anyhow::Result<()> {
    let mut entries: Vec<_> = cfg.iter().collect();
    entries.sort();
    for (key, value) in entries {
        println!("{key}={value}");
    }
    for path in &cfg.loaded_files {
        println!("# loaded {}", path.display());
    }
    Ok(())
}
