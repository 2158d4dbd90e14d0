use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::env;
use std::fmt;
use std::fs::File;
use std::num::ParseIntError;
use std::path::Path;

const DEFAULT_TEAM_NAME: &str = "ratio-hedge";
const DEFAULT_REPLAY_PACE_MS: u64 = 0;
const DEFAULT_MAKER_FEE_BPS: i64 = -1;
const DEFAULT_TAKER_FEE_BPS: i64 = 2;
const DEFAULT_STATUS_EVERY_TICKS: u64 = 100;

#[derive(Debug)]
pub enum ConfigError {
    ParseIntError(ParseIntError),
    InvalidValue(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigError::ParseIntError(e) => write!(f, "Parse int error: {}", e),
            ConfigError::InvalidValue(e) => write!(f, "Invalid value: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ParseIntError> for ConfigError {
    fn from(err: ParseIntError) -> ConfigError {
        ConfigError::ParseIntError(err)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
struct TraderYaml {
    team_name: Option<String>,
    replay_file: Option<String>,
    replay_pace_ms: Option<u64>,
    maker_fee_bps: Option<i64>,
    taker_fee_bps: Option<i64>,
    status_file: Option<String>,
    status_every_ticks: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct TraderConfig {
    pub team_name: String,
    pub replay_file: Option<String>,
    pub replay_pace_ms: u64,
    pub maker_fee_bps: i64,
    pub taker_fee_bps: i64,
    pub status_file: Option<String>,
    pub status_every_ticks: u64,
}

impl Default for TraderConfig {
    fn default() -> Self {
        Self {
            team_name: DEFAULT_TEAM_NAME.to_string(),
            replay_file: None,
            replay_pace_ms: DEFAULT_REPLAY_PACE_MS,
            maker_fee_bps: DEFAULT_MAKER_FEE_BPS,
            taker_fee_bps: DEFAULT_TAKER_FEE_BPS,
            status_file: None,
            status_every_ticks: DEFAULT_STATUS_EVERY_TICKS,
        }
    }
}

impl TraderConfig {
    pub fn from_env_or_yaml() -> Result<Self> {
        let config_path = env::var("AUTOTRADER_CONFIG_PATH")
            .ok()
            .filter(|value| !value.trim().is_empty());
        if let Some(path) = config_path {
            return Self::from_yaml_path(path);
        }
        Self::from_env()
    }

    pub fn from_yaml_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let file = File::open(path_ref)
            .with_context(|| format!("failed to open trader config {}", path_ref.display()))?;
        let yaml: TraderYaml = serde_yaml::from_reader(file)
            .with_context(|| format!("failed to parse trader config {}", path_ref.display()))?;
        let mut cfg = Self::from_yaml(yaml);
        cfg.apply_overrides(|key| env::var(key).ok())?;
        log::info!("[CONFIG] loaded {} ({:?})", path_ref.display(), cfg);
        Ok(cfg)
    }

    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        cfg.apply_overrides(|key| env::var(key).ok())?;
        log::info!("[CONFIG] loaded from environment ({:?})", cfg);
        Ok(cfg)
    }

    pub fn replay_file(&self) -> Result<&str> {
        self.replay_file
            .as_deref()
            .ok_or_else(|| anyhow!("REPLAY_FILE must be set to run a replay session"))
    }

    fn from_yaml(yaml: TraderYaml) -> Self {
        Self {
            team_name: yaml
                .team_name
                .unwrap_or_else(|| DEFAULT_TEAM_NAME.to_string()),
            replay_file: yaml.replay_file,
            replay_pace_ms: yaml.replay_pace_ms.unwrap_or(DEFAULT_REPLAY_PACE_MS),
            maker_fee_bps: yaml.maker_fee_bps.unwrap_or(DEFAULT_MAKER_FEE_BPS),
            taker_fee_bps: yaml.taker_fee_bps.unwrap_or(DEFAULT_TAKER_FEE_BPS),
            status_file: yaml.status_file,
            status_every_ticks: yaml
                .status_every_ticks
                .unwrap_or(DEFAULT_STATUS_EVERY_TICKS),
        }
    }

    /// Values from `lookup` (the process environment outside tests) win over
    /// whatever was loaded before.
    fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = lookup("TEAM_NAME") {
            self.team_name = v.trim().to_string();
        }
        if let Some(v) = lookup("REPLAY_FILE") {
            self.replay_file = Some(v.trim().to_string());
        }
        if let Some(v) = lookup("REPLAY_PACE_MS") {
            self.replay_pace_ms = v.trim().parse()?;
        }
        if let Some(v) = lookup("MAKER_FEE_BPS") {
            self.maker_fee_bps = v.trim().parse()?;
        }
        if let Some(v) = lookup("TAKER_FEE_BPS") {
            self.taker_fee_bps = v.trim().parse()?;
        }
        if let Some(v) = lookup("STATUS_FILE") {
            self.status_file = Some(v.trim().to_string());
        }
        if let Some(v) = lookup("STATUS_EVERY_TICKS") {
            self.status_every_ticks = v.trim().parse()?;
        }

        if self.status_every_ticks == 0 {
            return Err(ConfigError::InvalidValue(
                "STATUS_EVERY_TICKS must be positive".to_string(),
            ));
        }
        if self.team_name.is_empty() {
            return Err(ConfigError::InvalidValue(
                "team name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn lookup_in(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    fn yaml_from(text: &str) -> TraderYaml {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", text).unwrap();
        let reader = File::open(file.path()).unwrap();
        serde_yaml::from_reader(reader).unwrap()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let mut cfg = TraderConfig::default();
        cfg.apply_overrides(lookup_in(&[])).unwrap();
        assert_eq!(cfg.team_name, "ratio-hedge");
        assert_eq!(cfg.maker_fee_bps, -1);
        assert_eq!(cfg.taker_fee_bps, 2);
        assert_eq!(cfg.status_every_ticks, 100);
        assert!(cfg.replay_file().is_err());
    }

    #[test]
    fn yaml_fields_fill_in_over_defaults() {
        let yaml = yaml_from(
            "team_name: blue\nreplay_file: data/market.jsonl\nreplay_pace_ms: 5\nstatus_every_ticks: 10\n",
        );
        let cfg = TraderConfig::from_yaml(yaml);
        assert_eq!(cfg.team_name, "blue");
        assert_eq!(cfg.replay_file().unwrap(), "data/market.jsonl");
        assert_eq!(cfg.replay_pace_ms, 5);
        assert_eq!(cfg.status_every_ticks, 10);
        assert_eq!(cfg.taker_fee_bps, 2);
        assert!(cfg.status_file.is_none());
    }

    #[test]
    fn env_overrides_yaml() {
        let yaml = yaml_from("team_name: blue\ntaker_fee_bps: 3\n");
        let mut cfg = TraderConfig::from_yaml(yaml);
        cfg.apply_overrides(lookup_in(&[
            ("TAKER_FEE_BPS", "5"),
            ("STATUS_FILE", " /tmp/status.json "),
            ("TEAM_NAME", ""),
        ]))
        .unwrap();
        assert_eq!(cfg.taker_fee_bps, 5);
        assert_eq!(cfg.status_file.as_deref(), Some("/tmp/status.json"));
        assert_eq!(cfg.team_name, "blue");
    }

    #[test]
    fn bad_numbers_are_rejected() {
        let mut cfg = TraderConfig::default();
        let err = cfg
            .apply_overrides(lookup_in(&[("MAKER_FEE_BPS", "cheap")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::ParseIntError(_)));

        let mut cfg = TraderConfig::default();
        let err = cfg
            .apply_overrides(lookup_in(&[("STATUS_EVERY_TICKS", "0")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));
    }

    #[test]
    fn unreadable_yaml_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(TraderConfig::from_yaml_path(dir.path().join("missing.yaml")).is_err());
    }
}
