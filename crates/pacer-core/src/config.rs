use crate::error::{PacerError, Result};
use crate::ledger::QuotaWindow;
use crate::paths;
use crate::types::ActionKind;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// AccountConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    pub id: String,
}

// ---------------------------------------------------------------------------
// JitterRange
// ---------------------------------------------------------------------------

/// Bounds of the random delay inserted before an admitted action runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct JitterRange {
    #[serde(default)]
    pub min_secs: u64,
    #[serde(default)]
    pub max_secs: u64,
}

impl JitterRange {
    pub fn new(min_secs: u64, max_secs: u64) -> Self {
        Self { min_secs, max_secs }
    }

    pub fn none() -> Self {
        Self::default()
    }

    /// Inclusive bounds in milliseconds. An inverted range collapses to `min`.
    pub fn bounds_ms(&self) -> (u64, u64) {
        let min = self.min_secs.saturating_mul(1000);
        let max = self.max_secs.saturating_mul(1000).max(min);
        (min, max)
    }
}

// ---------------------------------------------------------------------------
// WindowLimit / KindLimits
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowLimit {
    pub window_secs: u64,
    pub limit: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindLimits {
    #[serde(default)]
    pub min_spacing_secs: u64,
    #[serde(default)]
    pub jitter: JitterRange,
    #[serde(default)]
    pub windows: Vec<WindowLimit>,
}

impl KindLimits {
    /// No spacing, no jitter, no windows.
    pub fn unlimited() -> Self {
        Self {
            min_spacing_secs: 0,
            jitter: JitterRange::none(),
            windows: Vec::new(),
        }
    }

    pub fn with_min_spacing(mut self, spacing: Duration) -> Self {
        self.min_spacing_secs = spacing.as_secs();
        self
    }

    pub fn with_window(mut self, window: Duration, limit: u32) -> Self {
        self.windows.push(WindowLimit {
            window_secs: window.as_secs(),
            limit,
        });
        self
    }

    pub fn with_jitter(mut self, jitter: JitterRange) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn min_spacing(&self) -> Duration {
        Duration::from_secs(self.min_spacing_secs)
    }

    /// Windows sorted shortest first. Zero-length windows are dropped: they
    /// can never contain an event.
    pub fn quota_windows(&self) -> Vec<QuotaWindow> {
        let mut windows: Vec<QuotaWindow> = self
            .windows
            .iter()
            .filter(|w| w.window_secs > 0)
            .map(|w| QuotaWindow::new(Duration::from_secs(w.window_secs), w.limit))
            .collect();
        windows.sort_by_key(|w| w.duration);
        windows
    }

    fn daily(min_spacing_secs: u64, jitter: JitterRange, hourly: u32, daily: u32) -> Self {
        Self {
            min_spacing_secs,
            jitter,
            windows: vec![
                WindowLimit {
                    window_secs: 3600,
                    limit: hourly,
                },
                WindowLimit {
                    window_secs: 86_400,
                    limit: daily,
                },
            ],
        }
    }
}

// ---------------------------------------------------------------------------
// LimitsConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_follow_limits")]
    pub follow: KindLimits,
    #[serde(default = "default_unfollow_limits")]
    pub unfollow: KindLimits,
    #[serde(default = "default_like_limits")]
    pub like: KindLimits,
    #[serde(default = "default_comment_limits")]
    pub comment: KindLimits,
}

fn default_follow_limits() -> KindLimits {
    KindLimits::daily(45, JitterRange::new(5, 15), 20, 150)
}

fn default_unfollow_limits() -> KindLimits {
    KindLimits::daily(45, JitterRange::new(5, 15), 20, 150)
}

fn default_like_limits() -> KindLimits {
    KindLimits::daily(20, JitterRange::new(2, 8), 60, 300)
}

fn default_comment_limits() -> KindLimits {
    KindLimits::daily(120, JitterRange::new(10, 30), 8, 50)
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            follow: default_follow_limits(),
            unfollow: default_unfollow_limits(),
            like: default_like_limits(),
            comment: default_comment_limits(),
        }
    }
}

impl LimitsConfig {
    /// The same limits for every kind.
    pub fn uniform(limits: KindLimits) -> Self {
        Self {
            follow: limits.clone(),
            unfollow: limits.clone(),
            like: limits.clone(),
            comment: limits,
        }
    }

    pub fn for_kind(&self, kind: ActionKind) -> &KindLimits {
        match kind {
            ActionKind::Follow => &self.follow,
            ActionKind::Unfollow => &self.unfollow,
            ActionKind::Like => &self.like,
            ActionKind::Comment => &self.comment,
        }
    }

    pub fn set(&mut self, kind: ActionKind, limits: KindLimits) {
        match kind {
            ActionKind::Follow => self.follow = limits,
            ActionKind::Unfollow => self.unfollow = limits,
            ActionKind::Like => self.like = limits,
            ActionKind::Comment => self.comment = limits,
        }
    }
}

// ---------------------------------------------------------------------------
// CooldownConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CooldownConfig {
    /// Used by `pacer cooldown start` when no duration is given.
    #[serde(default = "default_cooldown_secs")]
    pub default_secs: u64,
    /// Applied automatically when the executor reports a suspected block.
    /// Zero disables the automatic cooldown.
    #[serde(default = "default_block_cooldown_secs")]
    pub on_suspected_block_secs: u64,
}

fn default_cooldown_secs() -> u64 {
    3600
}

fn default_block_cooldown_secs() -> u64 {
    6 * 3600
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            default_secs: default_cooldown_secs(),
            on_suspected_block_secs: default_block_cooldown_secs(),
        }
    }
}

impl CooldownConfig {
    pub fn default_duration(&self) -> Duration {
        Duration::from_secs(self.default_secs)
    }

    pub fn on_suspected_block(&self) -> Option<Duration> {
        (self.on_suspected_block_secs > 0).then(|| Duration::from_secs(self.on_suspected_block_secs))
    }
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    pub account: AccountConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub cooldown: CooldownConfig,
    #[serde(default = "default_executor_timeout")]
    pub executor_timeout_secs: u64,
    /// When false, a failed attempt (other than a timeout) gives its quota
    /// slot back.
    #[serde(default = "default_count_failed")]
    pub count_failed_attempts: bool,
}

fn default_version() -> u32 {
    1
}

fn default_executor_timeout() -> u64 {
    60
}

fn default_count_failed() -> bool {
    true
}

impl Config {
    pub fn new(account_id: impl Into<String>) -> Self {
        Self {
            version: default_version(),
            account: AccountConfig {
                id: account_id.into(),
            },
            limits: LimitsConfig::default(),
            cooldown: CooldownConfig::default(),
            executor_timeout_secs: default_executor_timeout(),
            count_failed_attempts: default_count_failed(),
        }
    }

    pub fn executor_timeout(&self) -> Duration {
        Duration::from_secs(self.executor_timeout_secs)
    }

    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Err(PacerError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    /// Fail on the first error-level warning.
    pub fn ensure_valid(&self) -> Result<()> {
        match self
            .validate()
            .into_iter()
            .find(|w| w.level == WarnLevel::Error)
        {
            Some(w) => Err(PacerError::InvalidConfig(w.message)),
            None => Ok(()),
        }
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let mut push = |level: WarnLevel, message: String| {
            warnings.push(ConfigWarning { level, message })
        };

        if self.account.id.trim().is_empty() {
            push(WarnLevel::Error, "account.id must not be empty".to_string());
        }

        if self.executor_timeout_secs == 0 {
            push(
                WarnLevel::Error,
                "executor_timeout_secs must be greater than zero".to_string(),
            );
        }

        for &kind in ActionKind::all() {
            let limits = self.limits.for_kind(kind);

            if limits.windows.is_empty() {
                push(
                    WarnLevel::Warning,
                    format!("limits.{kind} has no windows: {kind} actions are unlimited"),
                );
            }

            if limits.jitter.min_secs > limits.jitter.max_secs {
                push(
                    WarnLevel::Error,
                    format!(
                        "limits.{kind}.jitter has min_secs={} > max_secs={}",
                        limits.jitter.min_secs, limits.jitter.max_secs
                    ),
                );
            }

            for w in &limits.windows {
                if w.window_secs == 0 {
                    push(
                        WarnLevel::Error,
                        format!("limits.{kind} has a window with window_secs=0"),
                    );
                }
                if w.limit == 0 {
                    push(
                        WarnLevel::Warning,
                        format!(
                            "limits.{kind} has limit=0 for a {}s window: {kind} is disabled",
                            w.window_secs
                        ),
                    );
                }
            }

            let mut seen = std::collections::HashSet::new();
            for w in &limits.windows {
                if !seen.insert(w.window_secs) {
                    push(
                        WarnLevel::Warning,
                        format!(
                            "limits.{kind} has more than one {}s window",
                            w.window_secs
                        ),
                    );
                }
            }

            // A shorter window whose limit is at least the longer window's
            // limit can never be the one that denies.
            let windows = limits.quota_windows();
            for pair in windows.windows(2) {
                let (short, long) = (&pair[0], &pair[1]);
                if short.duration < long.duration && short.limit >= long.limit {
                    push(
                        WarnLevel::Warning,
                        format!(
                            "limits.{kind}: {}s window (limit {}) never binds under the {}s window (limit {})",
                            short.duration.as_secs(),
                            short.limit,
                            long.duration.as_secs(),
                            long.limit
                        ),
                    );
                }
            }
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_roundtrip() {
        let cfg = Config::new("my_account");
        let yaml = serde_yaml::to_string(&cfg).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.account.id, "my_account");
        assert_eq!(parsed.version, 1);
        assert_eq!(parsed.limits, LimitsConfig::default());
    }

    #[test]
    fn minimal_yaml_fills_defaults() {
        let cfg: Config = serde_yaml::from_str("account:\n  id: acct\n").unwrap();
        assert_eq!(cfg.executor_timeout_secs, 60);
        assert!(cfg.count_failed_attempts);
        assert_eq!(cfg.limits.like.windows.len(), 2);
        assert_eq!(cfg.cooldown.default_secs, 3600);
    }

    #[test]
    fn partial_limits_keep_other_kinds_default() {
        let yaml = "\
account:
  id: acct
limits:
  follow:
    min_spacing_secs: 30
    windows:
      - window_secs: 86400
        limit: 5
";
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.limits.follow.min_spacing_secs, 30);
        assert_eq!(cfg.limits.follow.windows.len(), 1);
        assert_eq!(cfg.limits.follow.jitter, JitterRange::none());
        assert_eq!(cfg.limits.like, default_like_limits());
    }

    #[test]
    fn default_config_has_no_errors() {
        let warnings = Config::new("acct").validate();
        assert!(
            warnings.iter().all(|w| w.level != WarnLevel::Error),
            "{warnings:?}"
        );
        assert!(Config::new("acct").ensure_valid().is_ok());
    }

    #[test]
    fn inverted_jitter_is_an_error() {
        let mut cfg = Config::new("acct");
        cfg.limits.like.jitter = JitterRange::new(10, 2);
        let warnings = cfg.validate();
        assert!(warnings
            .iter()
            .any(|w| w.level == WarnLevel::Error && w.message.contains("limits.like.jitter")));
        assert!(matches!(
            cfg.ensure_valid(),
            Err(PacerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn empty_account_is_an_error() {
        let cfg = Config::new("  ");
        assert!(cfg.ensure_valid().is_err());
    }

    #[test]
    fn non_binding_window_is_a_warning() {
        let mut cfg = Config::new("acct");
        cfg.limits.comment = KindLimits::unlimited()
            .with_window(Duration::from_secs(3600), 100)
            .with_window(Duration::from_secs(86_400), 50);
        let warnings = cfg.validate();
        assert!(warnings
            .iter()
            .any(|w| w.level == WarnLevel::Warning && w.message.contains("never binds")));
    }

    #[test]
    fn quota_windows_sorted_and_zero_dropped() {
        let limits = KindLimits::unlimited()
            .with_window(Duration::from_secs(86_400), 10)
            .with_window(Duration::from_secs(0), 1)
            .with_window(Duration::from_secs(3600), 2);
        let windows = limits.quota_windows();
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].duration, Duration::from_secs(3600));
        assert_eq!(windows[1].duration, Duration::from_secs(86_400));
    }

    #[test]
    fn inverted_jitter_bounds_collapse_to_min() {
        assert_eq!(JitterRange::new(5, 1).bounds_ms(), (5000, 5000));
        assert_eq!(JitterRange::new(1, 3).bounds_ms(), (1000, 3000));
    }

    #[test]
    fn load_without_init_is_not_initialized() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            Config::load(dir.path()),
            Err(PacerError::NotInitialized)
        ));
    }

    #[test]
    fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let mut cfg = Config::new("acct");
        cfg.count_failed_attempts = false;
        cfg.save(dir.path()).unwrap();
        let loaded = Config::load(dir.path()).unwrap();
        assert!(!loaded.count_failed_attempts);
        assert_eq!(loaded.account.id, "acct");
    }
}
