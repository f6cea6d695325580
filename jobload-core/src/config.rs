use rand::Rng;
use std::fmt;
use std::time::Duration;

use crate::thresholds::{ThresholdRule, ThresholdSet, compile_thresholds};
use crate::{Error, Result};

pub const DEFAULT_BASE_URL: &str = "https://api.dev.growbin.app";
pub const DEFAULT_IMAGE_URL: &str =
    "https://images.dev.growbin.app/scan/e09725344fc2418a88f293b0f20db173.png";
pub const DEFAULT_VUS: u64 = 50;
pub const DEFAULT_DURATION: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    pub duration: Duration,
    pub target: u64,
}

impl Stage {
    pub const fn new(duration: Duration, target: u64) -> Self {
        Self { duration, target }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RampConfig {
    pub start_vus: u64,
    pub stages: Vec<Stage>,
    /// How long retiring virtual users may keep running before they are
    /// abandoned.
    pub graceful_ramp_down: Duration,
}

impl RampConfig {
    pub fn max_vus(&self) -> u64 {
        self.stages
            .iter()
            .map(|s| s.target)
            .fold(self.start_vus, u64::max)
    }

    pub fn total_duration(&self) -> Duration {
        self.stages
            .iter()
            .fold(Duration::ZERO, |acc, s| acc.saturating_add(s.duration))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub max_attempts: u32,
    pub interval: Duration,
}

/// Per-call budgets. An exceeded budget fails the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallTimeouts {
    pub create: Duration,
    pub poll: Duration,
    pub result: Duration,
    pub health: Duration,
}

impl Default for CallTimeouts {
    fn default() -> Self {
        Self {
            create: Duration::from_secs(30),
            poll: Duration::from_secs(10),
            result: Duration::from_secs(10),
            health: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IterationPacing {
    pub pause: Duration,
    /// Upper bound of a uniform random delay added to `pause`.
    pub jitter: Duration,
    /// Extra pause after a failed creation call.
    pub after_failure: Duration,
}

impl IterationPacing {
    pub fn next_pause<R: Rng + ?Sized>(&self, rng: &mut R, creation_failed: bool) -> Duration {
        let mut pause = self.pause;
        if !self.jitter.is_zero() {
            pause += rng.gen_range(Duration::ZERO..self.jitter);
        }
        if creation_failed {
            pause += self.after_failure;
        }
        pause
    }
}

/// Observations that differ between the two scenario variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IterationAccounting {
    /// A failed creation also counts as an incomplete job in `completion_rate`.
    pub creation_failure_counts_as_incomplete: bool,
    /// `e2e_latency_ms` covers every created job, not only the ones that reach
    /// the final read.
    pub e2e_latency_for_every_job: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum MarkerCondition {
    Always,
    /// Only when the completed job carries a named reward.
    OnReward,
}

/// A pipeline milestone that is known to have happened once a job completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageMarker {
    pub name: String,
    pub condition: MarkerCondition,
}

impl StageMarker {
    pub fn always(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            condition: MarkerCondition::Always,
        }
    }

    pub fn on_reward(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            condition: MarkerCondition::OnReward,
        }
    }

    pub fn counter_name(&self) -> String {
        format!("stage_{}_total", self.name)
    }
}

pub fn default_stage_markers() -> Vec<StageMarker> {
    vec![
        StageMarker::always("vision"),
        StageMarker::always("rule"),
        StageMarker::always("answer"),
        StageMarker::on_reward("reward"),
        StageMarker::always("done"),
    ]
}

/// Bearer token. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiPaths {
    pub create: String,
    /// The job id is appended as a final path segment.
    pub status: String,
    pub health: String,
}

impl Default for ApiPaths {
    fn default() -> Self {
        Self {
            create: "/api/v1/scan".to_string(),
            status: "/api/v1/scan/result".to_string(),
            health: "/health".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetConfig {
    pub base_url: String,
    pub token: Option<Credential>,
    pub image_url: String,
    pub paths: ApiPaths,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            token: None,
            image_url: DEFAULT_IMAGE_URL.to_string(),
            paths: ApiPaths::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum Preset {
    /// Sustained load: ramp to `vus`, hold for `duration`, ramp down.
    Load,
    /// Short end-to-end check with a fixed small profile.
    E2e,
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub target: TargetConfig,
    pub ramp: RampConfig,
    pub poll: PollConfig,
    pub timeouts: CallTimeouts,
    pub pacing: IterationPacing,
    pub accounting: IterationAccounting,
    pub stage_markers: Vec<StageMarker>,
    pub thresholds: Vec<ThresholdSet>,
    pub health_check: bool,
    pub progress_interval: Duration,
}

impl RunConfig {
    /// `vus` and `duration` only shape the `Load` profile.
    pub fn preset(preset: Preset, vus: u64, duration: Duration) -> Self {
        let secs = Duration::from_secs;
        let (ramp, poll, pacing, accounting, thresholds) = match preset {
            Preset::Load => (
                RampConfig {
                    start_vus: 0,
                    stages: vec![
                        Stage::new(secs(30), vus),
                        Stage::new(duration, vus),
                        Stage::new(secs(30), 0),
                    ],
                    graceful_ramp_down: secs(30),
                },
                PollConfig {
                    max_attempts: 30,
                    interval: Duration::from_millis(2500),
                },
                IterationPacing {
                    pause: secs(1),
                    jitter: secs(1),
                    after_failure: secs(2),
                },
                IterationAccounting {
                    creation_failure_counts_as_incomplete: true,
                    e2e_latency_for_every_job: true,
                },
                vec![
                    ThresholdSet::new("scan_success_rate", ["rate>0.90"]),
                    ThresholdSet::new("completion_rate", ["rate>0.85"]),
                    ThresholdSet::new("scan_latency_ms", ["p(95)<5000"]),
                    ThresholdSet::new("time_to_complete_ms", ["p(95)<60000"]),
                    ThresholdSet::new("e2e_latency_ms", ["p(95)<90000"]),
                ],
            ),
            Preset::E2e => (
                RampConfig {
                    start_vus: 1,
                    stages: vec![
                        Stage::new(secs(30), 5),
                        Stage::new(secs(60), 10),
                        Stage::new(secs(30), 5),
                        Stage::new(secs(20), 0),
                    ],
                    graceful_ramp_down: secs(10),
                },
                PollConfig {
                    max_attempts: 24,
                    interval: Duration::from_millis(2500),
                },
                IterationPacing {
                    pause: secs(1),
                    ..IterationPacing::default()
                },
                IterationAccounting::default(),
                vec![
                    ThresholdSet::new("scan_success_rate", ["rate>0.95"]),
                    ThresholdSet::new("completion_rate", ["rate>0.90"]),
                    ThresholdSet::new("e2e_success_rate", ["rate>0.85"]),
                    ThresholdSet::new("e2e_latency_ms", ["p(95)<30000"]),
                    ThresholdSet::new("scan_latency_ms", ["p(95)<2000"]),
                ],
            ),
        };

        Self {
            target: TargetConfig::default(),
            ramp,
            poll,
            timeouts: CallTimeouts::default(),
            pacing,
            accounting,
            stage_markers: default_stage_markers(),
            thresholds,
            health_check: true,
            progress_interval: secs(1),
        }
    }

    /// Checks everything a run needs before any virtual user starts and
    /// compiles the threshold expressions.
    pub fn validate(&self) -> Result<Vec<ThresholdRule>> {
        if self
            .target
            .token
            .as_ref()
            .is_none_or(|t| t.expose().trim().is_empty())
        {
            return Err(Error::MissingCredential);
        }

        let base = &self.target.base_url;
        let parsed = url::Url::parse(base).map_err(|e| Error::InvalidBaseUrl {
            url: base.clone(),
            reason: e.to_string(),
        })?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(Error::InvalidBaseUrl {
                url: base.clone(),
                reason: "scheme must be http or https".to_string(),
            });
        }

        if self.ramp.stages.is_empty() {
            return Err(Error::InvalidRamp("at least one stage is required".into()));
        }
        if self.ramp.total_duration().is_zero() {
            return Err(Error::InvalidRamp("stages must span a non-zero duration".into()));
        }

        if self.poll.max_attempts == 0 {
            return Err(Error::InvalidPoll("max_attempts must be at least 1".into()));
        }

        let mut seen = std::collections::HashSet::new();
        for marker in &self.stage_markers {
            let valid = !marker.name.is_empty()
                && marker
                    .name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_');
            if !valid {
                return Err(Error::InvalidConfig(format!(
                    "stage marker `{}` must be non-empty [A-Za-z0-9_]",
                    marker.name
                )));
            }
            if !seen.insert(marker.name.as_str()) {
                return Err(Error::InvalidConfig(format!(
                    "duplicate stage marker `{}`",
                    marker.name
                )));
            }
        }

        if self.progress_interval.is_zero() {
            return Err(Error::InvalidConfig(
                "progress interval must be non-zero".into(),
            ));
        }

        compile_thresholds(&self.thresholds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn valid() -> RunConfig {
        let mut cfg = RunConfig::preset(Preset::E2e, 1, Duration::from_secs(1));
        cfg.target.token = Some(Credential::new("t"));
        cfg
    }

    #[test]
    fn missing_or_blank_credential_is_fatal() {
        let mut cfg = valid();
        cfg.target.token = None;
        assert!(matches!(cfg.validate(), Err(Error::MissingCredential)));

        cfg.target.token = Some(Credential::new("  "));
        assert!(matches!(cfg.validate(), Err(Error::MissingCredential)));
    }

    #[test]
    fn credential_debug_is_redacted() {
        let cfg = valid();
        let dbg = format!("{:?}", cfg.target);
        assert!(dbg.contains("Credential(***)"));
        assert!(!dbg.contains("Some(\"t\")"));
    }

    #[test]
    fn load_preset_shapes_ramp_from_vus_and_duration() {
        let cfg = RunConfig::preset(Preset::Load, 20, Duration::from_secs(300));
        assert_eq!(cfg.ramp.start_vus, 0);
        assert_eq!(cfg.ramp.max_vus(), 20);
        assert_eq!(cfg.ramp.total_duration(), Duration::from_secs(360));
        assert_eq!(cfg.poll.max_attempts, 30);
        assert_eq!(cfg.ramp.graceful_ramp_down, Duration::from_secs(30));
        assert!(cfg.accounting.creation_failure_counts_as_incomplete);
        assert!(cfg.accounting.e2e_latency_for_every_job);
    }

    #[test]
    fn e2e_preset_ignores_vus() {
        let cfg = RunConfig::preset(Preset::E2e, 500, Duration::from_secs(1));
        assert_eq!(cfg.ramp.start_vus, 1);
        assert_eq!(cfg.ramp.max_vus(), 10);
        assert_eq!(cfg.poll.max_attempts, 24);
        assert_eq!(cfg.accounting, IterationAccounting::default());
    }

    #[test]
    fn presets_compile_their_thresholds() {
        for preset in [Preset::Load, Preset::E2e] {
            let mut cfg = RunConfig::preset(preset, 5, Duration::from_secs(10));
            cfg.target.token = Some(Credential::new("t"));
            let rules = cfg.validate().unwrap_or_else(|e| panic!("{preset}: {e}"));
            assert_eq!(rules.len(), 5);
        }
    }

    #[test]
    fn rejects_bad_base_url_and_empty_ramp() {
        let mut cfg = valid();
        cfg.target.base_url = "ftp://example.com".into();
        assert!(matches!(cfg.validate(), Err(Error::InvalidBaseUrl { .. })));

        let mut cfg = valid();
        cfg.ramp.stages.clear();
        assert!(matches!(cfg.validate(), Err(Error::InvalidRamp(_))));

        let mut cfg = valid();
        cfg.poll.max_attempts = 0;
        assert!(matches!(cfg.validate(), Err(Error::InvalidPoll(_))));
    }

    #[test]
    fn rejects_duplicate_or_malformed_markers() {
        let mut cfg = valid();
        cfg.stage_markers.push(StageMarker::always("done"));
        assert!(matches!(cfg.validate(), Err(Error::InvalidConfig(_))));

        let mut cfg = valid();
        cfg.stage_markers = vec![StageMarker::always("bad name")];
        assert!(matches!(cfg.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn pacing_adds_jitter_within_bounds_and_failure_pause() {
        let pacing = IterationPacing {
            pause: Duration::from_secs(1),
            jitter: Duration::from_secs(1),
            after_failure: Duration::from_secs(2),
        };
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let p = pacing.next_pause(&mut rng, false);
            assert!(p >= Duration::from_secs(1) && p < Duration::from_secs(2));
        }
        let p = pacing.next_pause(&mut rng, true);
        assert!(p >= Duration::from_secs(3) && p < Duration::from_secs(4));

        let fixed = IterationPacing {
            pause: Duration::from_millis(10),
            ..IterationPacing::default()
        };
        assert_eq!(fixed.next_pause(&mut rng, false), Duration::from_millis(10));
    }
}
