pub mod cli;
pub mod commands;
pub mod config;
pub mod countdown;
pub mod datetime;
pub mod leaderboard;
pub mod period;
pub mod render;
pub mod watch;

use std::ffi::OsString;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use tracing::{
  debug,
  info
};

use crate::watch::{
  Clock,
  OffsetClock,
  SystemClock
};

#[tracing::instrument(skip_all)]
pub fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<()> {
  let pre =
    cli::preprocess_args(&raw_args)?;
  let cli = cli::GlobalCli::parse_from(
    pre.cleaned_args
  );

  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;

  info!(
    verbose = cli.verbose,
    quiet = cli.quiet,
    "starting cadence CLI"
  );
  debug!(?pre.rc_overrides, "preprocessed rc overrides");

  let mut cfg = config::Config::load(
    cli.cadencerc.as_deref()
  )?;
  cfg.apply_overrides(
    pre.rc_overrides.into_iter().chain(
      cli
        .rc_overrides
        .into_iter()
        .map(|kv| (kv.key, kv.value))
    )
  );

  let clock: Box<dyn Clock> =
    match cli.now.as_deref() {
      | Some(expr) => {
        let pinned =
          datetime::parse_now_expr(
            expr,
            Utc::now()
          )
          .with_context(|| {
            format!(
              "invalid --now value: \
               {expr}"
            )
          })?;
        debug!(now = %pinned, "using pinned clock");
        Box::new(OffsetClock::starting_at(
          pinned
        ))
      }
      | None => Box::new(SystemClock)
    };

  let mut renderer =
    render::Renderer::new(&cfg)?;

  commands::dispatch(
    &cfg,
    &mut renderer,
    cli.command.unwrap_or_default(),
    clock.as_ref()
  )?;

  info!("done");
  Ok(())
}
