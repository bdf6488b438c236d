use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
pub struct PreprocessedArgs {
    pub cleaned_args: Vec<OsString>,
    pub rc_overrides: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for KeyVal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (k, v) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
        Ok(Self {
            key: k.trim().to_string(),
            value: v.trim().to_string(),
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "cadence",
    version,
    about = "Biweekly leaderboard windows and countdowns",
    disable_help_subcommand = true
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count, global = true)]
    pub quiet: u8,

    #[arg(
        long = "rc",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append,
        global = true
    )]
    pub rc_overrides: Vec<KeyVal>,

    #[arg(long = "cadencerc", global = true)]
    pub cadencerc: Option<PathBuf>,

    /// Pretend the current time is EXPR (e.g. 2025-08-05, -3d, RFC3339).
    #[arg(long = "now", value_name = "EXPR", global = true)]
    pub now: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Show the reporting window containing now.
    Range {
        /// Show the window before the current one.
        #[arg(long)]
        previous: bool,

        #[arg(long)]
        json: bool,
    },
    /// Show time left in the current window.
    Countdown {
        /// Keep polling and print a line per tick.
        #[arg(long)]
        watch: bool,

        /// Stop watching after N ticks.
        #[arg(long, value_name = "N")]
        ticks: Option<u64>,
    },
    /// Print the leaderboard request URL for a period.
    Query {
        #[arg(long)]
        period: Option<String>,
    },
    /// Rank a leaderboard response body read from FILE or stdin.
    Rank {
        file: Option<PathBuf>,

        #[arg(long)]
        period: Option<String>,
    },
    /// Print the effective configuration.
    Show,
    Version,
}

impl Default for Command {
    fn default() -> Self {
        Self::Range {
            previous: false,
            json: false,
        }
    }
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let default_level = if quiet >= 2 {
        "error"
    } else if quiet == 1 {
        "warn"
    } else if verbose >= 3 {
        "trace"
    } else if verbose == 2 {
        "debug"
    } else if verbose == 1 {
        "info"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}

/// Pulls positional `rc.key=value` / `rc.key:value` overrides out of argv.
#[tracing::instrument(skip_all)]
pub fn preprocess_args(raw: &[OsString]) -> anyhow::Result<PreprocessedArgs> {
    let mut cleaned = Vec::with_capacity(raw.len());
    let mut overrides: Vec<(String, String)> = Vec::new();

    let mut iter = raw.iter().cloned();
    if let Some(bin) = iter.next() {
        cleaned.push(bin);
    }

    for arg in iter {
        let s = arg.to_string_lossy();
        if let Some(rest) = s.strip_prefix("rc.") {
            let parsed = if let Some((k, v)) = rest.split_once('=') {
                Some((format!("rc.{k}"), v.to_string()))
            } else if let Some((k, v)) = rest.split_once(':') {
                Some((format!("rc.{k}"), v.to_string()))
            } else {
                None
            };

            if let Some((k, v)) = parsed {
                debug!(key = %k, value = %v, "captured positional rc override");
                overrides.push((k, v));
                continue;
            }
        }

        cleaned.push(arg);
    }

    Ok(PreprocessedArgs {
        cleaned_args: cleaned,
        rc_overrides: overrides,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<OsString> {
        list.iter().map(OsString::from).collect()
    }

    #[test]
    fn positional_overrides_are_extracted() {
        let pre = preprocess_args(&args(&[
            "cadence",
            "rc.epoch=2025-01-05",
            "query",
            "rc.leaderboard.period:weekly",
        ]))
        .expect("preprocess");

        assert_eq!(pre.cleaned_args, args(&["cadence", "query"]));
        assert_eq!(
            pre.rc_overrides,
            vec![
                ("rc.epoch".to_string(), "2025-01-05".to_string()),
                ("rc.leaderboard.period".to_string(), "weekly".to_string()),
            ]
        );
    }

    #[test]
    fn parses_subcommands_and_globals() {
        let cli = GlobalCli::try_parse_from(args(&[
            "cadence",
            "countdown",
            "--watch",
            "--ticks",
            "3",
            "--now",
            "2025-08-05",
            "--rc",
            "color=off",
        ]))
        .expect("parse");

        assert_eq!(
            cli.command,
            Some(Command::Countdown {
                watch: true,
                ticks: Some(3),
            })
        );
        assert_eq!(cli.now.as_deref(), Some("2025-08-05"));
        assert_eq!(cli.rc_overrides.len(), 1);
        assert_eq!(cli.rc_overrides[0].key, "color");
    }

    #[test]
    fn missing_subcommand_defaults_to_range() {
        let cli = GlobalCli::try_parse_from(args(&["cadence"])).expect("parse");
        assert_eq!(cli.command.unwrap_or_default(), Command::default());
    }

    #[test]
    fn rejects_bad_keyval() {
        assert!("no-equals".parse::<KeyVal>().is_err());
    }
}
