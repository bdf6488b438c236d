use std::collections::HashMap;
use std::fs;
use std::path::{
  Path,
  PathBuf
};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{
  Context,
  anyhow
};
use tracing::{
  debug,
  info,
  trace
};

use crate::leaderboard::LeaderboardPeriod;
use crate::period::{
  DEFAULT_EPOCH,
  Epoch
};

const RC_ENV_VAR: &str = "CADENCERC";
const RC_FILE_NAME: &str = ".cadencerc";

#[derive(Debug, Clone)]
pub struct Config {
  map: HashMap<String, String>,
  pub loaded_files: Vec<PathBuf>
}

impl Default for Config {
  fn default() -> Self {
    let mut map = HashMap::new();
    for (key, value) in [
      ("epoch", DEFAULT_EPOCH),
      (
        "api.url",
        "http://localhost:3000/api/affiliates"
      ),
      ("leaderboard.period", "biweekly"),
      ("leaderboard.featured", "5moking"),
      ("watch.interval_ms", "1000"),
      ("color", "on")
    ] {
      map.insert(
        key.to_string(),
        value.to_string()
      );
    }

    Self {
      map,
      loaded_files: vec![]
    }
  }
}

impl Config {
  #[tracing::instrument(skip(
    rc_override
  ))]
  pub fn load(
    rc_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Config::default();

    let rc = resolve_rc_path(rc_override)?;
    if let Some(path) = rc {
      info!(rc = %path.display(), "loading cadencerc");
      cfg.load_file(&path)?;
    } else {
      debug!(
        "no cadencerc found; using \
         defaults"
      );
    }

    Ok(cfg)
  }

  #[tracing::instrument(skip(
    self, overrides
  ))]
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    for (k, v) in overrides {
      let key = k
        .strip_prefix("rc.")
        .unwrap_or(&k)
        .to_string();
      debug!(key = %key, value = %v, "applying override");
      self.map.insert(key, v);
    }
  }

  pub fn get(
    &self,
    key: &str
  ) -> Option<String> {
    self.map.get(key).cloned()
  }

  pub fn get_bool(
    &self,
    key: &str
  ) -> Option<bool> {
    self
      .map
      .get(key)
      .map(|v| parse_bool(v))
  }

  fn require(
    &self,
    key: &str
  ) -> anyhow::Result<String> {
    self.get(key).ok_or_else(|| {
      anyhow!(
        "missing config key: {key}"
      )
    })
  }

  pub fn epoch(
    &self
  ) -> anyhow::Result<Epoch> {
    let raw = self.require("epoch")?;
    Epoch::from_str(&raw).with_context(
      || {
        format!(
          "invalid config value \
           epoch={raw}"
        )
      }
    )
  }

  pub fn watch_interval(
    &self
  ) -> anyhow::Result<Duration> {
    let raw =
      self.require("watch.interval_ms")?;
    let millis: u64 = raw
      .trim()
      .parse()
      .with_context(|| {
        format!(
          "invalid config value \
           watch.interval_ms={raw}"
        )
      })?;
    if millis == 0 {
      return Err(anyhow!(
        "watch.interval_ms must be \
         greater than zero"
      ));
    }
    Ok(Duration::from_millis(millis))
  }

  pub fn leaderboard_period(
    &self
  ) -> anyhow::Result<LeaderboardPeriod>
  {
    self
      .require("leaderboard.period")?
      .parse()
  }

  pub fn iter(
    &self
  ) -> impl Iterator<Item = (&String, &String)>
  {
    self.map.iter()
  }

  #[tracing::instrument(skip(self))]
  fn load_file(
    &mut self,
    path: &Path
  ) -> anyhow::Result<()> {
    let path = expand_tilde(path);
    let text =
      fs::read_to_string(&path)
        .with_context(|| {
          format!(
            "failed to read {}",
            path.display()
          )
        })?;

    self
      .loaded_files
      .push(path.clone());

    let base_dir = path
      .parent()
      .map(|p| p.to_path_buf())
      .unwrap_or_else(|| {
        PathBuf::from(".")
      });

    for (line_num, raw_line) in
      text.lines().enumerate()
    {
      let line =
        strip_comment(raw_line).trim();
      if line.is_empty() {
        continue;
      }

      if let Some(include_rest) =
        line.strip_prefix("include ")
      {
        let include_path =
          resolve_include_path(
            &base_dir,
            include_rest.trim()
          )?;
        debug!(
            file = %path.display(),
            include = %include_path.display(),
            line = line_num + 1,
            "processing include"
        );

        if include_path.exists() {
          self
            .load_file(&include_path)?;
        } else {
          tracing::warn!(include = %include_path.display(), "include file does not exist; skipping");
        }
        continue;
      }

      let (k, v) = line
        .split_once('=')
        .ok_or_else(|| {
          anyhow!(
            "invalid config line \
             {}:{}: {}",
            path.display(),
            line_num + 1,
            raw_line
          )
        })?;

      let key = k.trim().to_string();
      let value = v.trim().to_string();
      trace!(key = %key, value = %value, "loaded config key");
      self.map.insert(key, value);
    }

    Ok(())
  }
}

#[tracing::instrument(skip(
  override_path
))]
fn resolve_rc_path(
  override_path: Option<&Path>
) -> anyhow::Result<Option<PathBuf>> {
  if let Some(path) = override_path {
    return Ok(Some(path.to_path_buf()));
  }

  if let Ok(rc_env) =
    std::env::var(RC_ENV_VAR)
  {
    if rc_env == "/dev/null" {
      return Ok(None);
    }
    return Ok(Some(PathBuf::from(
      rc_env
    )));
  }

  let Some(home) = dirs::home_dir()
  else {
    debug!(
      "cannot determine home \
       directory; skipping cadencerc"
    );
    return Ok(None);
  };
  let candidate = home.join(RC_FILE_NAME);
  if candidate.exists() {
    return Ok(Some(candidate));
  }

  Ok(None)
}

fn resolve_include_path(
  base_dir: &Path,
  include: &str
) -> anyhow::Result<PathBuf> {
  if include.trim().is_empty() {
    return Err(anyhow!(
      "include path cannot be empty"
    ));
  }

  let raw = PathBuf::from(include);
  let expanded = expand_tilde(&raw);
  if expanded.is_absolute() {
    Ok(expanded)
  } else {
    Ok(base_dir.join(expanded))
  }
}

fn expand_tilde(
  path: &Path
) -> PathBuf {
  let text = path.to_string_lossy();
  if let Some(rest) =
    text.strip_prefix("~/")
    && let Some(home) = dirs::home_dir()
  {
    return home.join(rest);
  }
  path.to_path_buf()
}

/// Cuts a `#` that opens the line or stands alone as a word, so values
/// such as `#tag` or `url#frag` survive.
fn strip_comment(line: &str) -> &str {
  let bytes = line.as_bytes();
  for (idx, byte) in
    bytes.iter().enumerate()
  {
    if *byte != b'#' {
      continue;
    }
    let opens_word = idx == 0
      || bytes[idx - 1]
        .is_ascii_whitespace();
    let ends_word = bytes
      .get(idx + 1)
      .is_none_or(|next| {
        next.is_ascii_whitespace()
      });
    let whole_line =
      line[..idx].trim().is_empty();
    if whole_line
      || (opens_word && ends_word)
    {
      return &line[..idx];
    }
  }
  line
}

fn parse_bool(s: &str) -> bool {
  matches!(
    s.trim()
      .to_ascii_lowercase()
      .as_str(),
    "1" | "y" | "yes" | "on" | "true"
  )
}
