use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context as _;
use jobload_core::config::{
    MarkerCondition, PollConfig, Preset, RunConfig, Stage, StageMarker,
};
use jobload_core::thresholds::ThresholdSet;
use serde::Deserialize;

/// YAML run plan. Every field is optional and replaces the preset value it
/// names.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct RunPlan {
    pub preset: Option<PresetYaml>,
    pub base_url: Option<String>,
    pub image_url: Option<String>,

    #[serde(rename = "startVUs")]
    pub start_vus: Option<u64>,
    #[serde(default)]
    pub stages: Vec<StageYaml>,
    pub graceful_ramp_down: Option<YamlDuration>,

    pub poll: Option<PollYaml>,
    #[serde(default)]
    pub timeouts: TimeoutsYaml,
    #[serde(default)]
    pub pacing: PacingYaml,

    #[serde(default)]
    pub stage_markers: Vec<StageMarkerYaml>,

    /// Replaces the preset thresholds entirely when non-empty.
    #[serde(default)]
    pub thresholds: BTreeMap<String, ThresholdExprYaml>,

    pub health_check: Option<bool>,
    pub progress_interval: Option<YamlDuration>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum PresetYaml {
    Load,
    E2e,
}

impl From<PresetYaml> for Preset {
    fn from(value: PresetYaml) -> Self {
        match value {
            PresetYaml::Load => Preset::Load,
            PresetYaml::E2e => Preset::E2e,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct StageYaml {
    pub target: u64,
    pub duration: YamlDuration,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct PollYaml {
    pub max_attempts: u32,
    pub interval: YamlDuration,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct TimeoutsYaml {
    pub create: Option<YamlDuration>,
    pub poll: Option<YamlDuration>,
    pub result: Option<YamlDuration>,
    pub health: Option<YamlDuration>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct PacingYaml {
    pub pause: Option<YamlDuration>,
    pub jitter: Option<YamlDuration>,
    pub after_failure: Option<YamlDuration>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct StageMarkerYaml {
    pub name: String,
    #[serde(default)]
    pub condition: ConditionYaml,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum ConditionYaml {
    #[default]
    Always,
    OnReward,
}

impl From<ConditionYaml> for MarkerCondition {
    fn from(value: ConditionYaml) -> Self {
        match value {
            ConditionYaml::Always => MarkerCondition::Always,
            ConditionYaml::OnReward => MarkerCondition::OnReward,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum ThresholdExprYaml {
    One(String),
    Many(Vec<String>),
}

impl ThresholdExprYaml {
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(s) => vec![s],
            Self::Many(v) => v,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct YamlDuration(Duration);

impl YamlDuration {
    fn into_inner(self) -> Duration {
        self.0
    }
}

impl<'de> Deserialize<'de> for YamlDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;

        impl<'de> serde::de::Visitor<'de> for V {
            type Value = YamlDuration;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("duration as string (e.g. 10s), integer seconds, or float seconds")
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(YamlDuration(Duration::from_secs(v)))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                u64::try_from(v)
                    .map(|v| YamlDuration(Duration::from_secs(v)))
                    .map_err(|_| E::custom("duration must not be negative"))
            }

            fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if !v.is_finite() || v < 0.0 {
                    return Err(E::custom("duration must be a non-negative, finite number"));
                }
                Ok(YamlDuration(Duration::from_secs_f64(v)))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                let d = humantime::parse_duration(v.trim()).map_err(E::custom)?;
                Ok(YamlDuration(d))
            }
        }

        deserializer.deserialize_any(V)
    }
}

pub(crate) fn parse(yaml: &str) -> anyhow::Result<RunPlan> {
    serde_yaml::from_str(yaml).context("invalid run plan")
}

pub(crate) async fn load(path: &Path) -> anyhow::Result<RunPlan> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read run plan: {}", path.display()))?;
    parse(&text).with_context(|| format!("in {}", path.display()))
}

impl RunPlan {
    /// Writes every field the plan sets into `cfg`.
    pub(crate) fn apply(self, cfg: &mut RunConfig) {
        if let Some(v) = self.base_url {
            cfg.target.base_url = v;
        }
        if let Some(v) = self.image_url {
            cfg.target.image_url = v;
        }

        if let Some(v) = self.start_vus {
            cfg.ramp.start_vus = v;
        }
        if !self.stages.is_empty() {
            cfg.ramp.stages = self
                .stages
                .into_iter()
                .map(|s| Stage::new(s.duration.into_inner(), s.target))
                .collect();
        }
        if let Some(v) = self.graceful_ramp_down {
            cfg.ramp.graceful_ramp_down = v.into_inner();
        }

        if let Some(p) = self.poll {
            cfg.poll = PollConfig {
                max_attempts: p.max_attempts,
                interval: p.interval.into_inner(),
            };
        }

        let t = self.timeouts;
        let timeouts = &mut cfg.timeouts;
        for (slot, value) in [
            (&mut timeouts.create, t.create),
            (&mut timeouts.poll, t.poll),
            (&mut timeouts.result, t.result),
            (&mut timeouts.health, t.health),
        ] {
            if let Some(v) = value {
                *slot = v.into_inner();
            }
        }

        let p = self.pacing;
        let pacing = &mut cfg.pacing;
        for (slot, value) in [
            (&mut pacing.pause, p.pause),
            (&mut pacing.jitter, p.jitter),
            (&mut pacing.after_failure, p.after_failure),
        ] {
            if let Some(v) = value {
                *slot = v.into_inner();
            }
        }

        if !self.stage_markers.is_empty() {
            cfg.stage_markers = self
                .stage_markers
                .into_iter()
                .map(|m| StageMarker {
                    name: m.name,
                    condition: m.condition.into(),
                })
                .collect();
        }

        if !self.thresholds.is_empty() {
            cfg.thresholds = self
                .thresholds
                .into_iter()
                .map(|(metric, exprs)| ThresholdSet::new(metric, exprs.into_vec()))
                .collect();
        }

        if let Some(v) = self.health_check {
            cfg.health_check = v;
        }
        if let Some(v) = self.progress_interval {
            cfg.progress_interval = v.into_inner();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> RunConfig {
        RunConfig::preset(Preset::Load, 10, Duration::from_secs(60))
    }

    #[test]
    fn full_plan_overrides_preset_fields() {
        let plan = parse(
            r#"
preset: e2e
baseUrl: http://127.0.0.1:8080
startVUs: 2
stages:
  - { duration: 10s, target: 4 }
  - { duration: 1.5, target: 0 }
gracefulRampDown: 3s
poll: { maxAttempts: 5, interval: 200ms }
timeouts: { create: 2s }
pacing: { pause: 0s, jitter: 100ms }
stageMarkers:
  - name: ocr
  - name: reward
    condition: on_reward
thresholds:
  scan_success_rate: rate>0.5
  e2e_latency_ms: ["p(95)<1000", "max<5000"]
healthCheck: false
"#,
        )
        .unwrap_or_else(|e| panic!("{e:#}"));

        assert!(matches!(plan.preset, Some(PresetYaml::E2e)));

        let mut cfg = base();
        plan.apply(&mut cfg);

        assert_eq!(cfg.target.base_url, "http://127.0.0.1:8080");
        assert_eq!(cfg.ramp.start_vus, 2);
        assert_eq!(
            cfg.ramp.stages,
            vec![
                Stage::new(Duration::from_secs(10), 4),
                Stage::new(Duration::from_millis(1500), 0)
            ]
        );
        assert_eq!(cfg.ramp.graceful_ramp_down, Duration::from_secs(3));
        assert_eq!(cfg.poll.max_attempts, 5);
        assert_eq!(cfg.poll.interval, Duration::from_millis(200));
        assert_eq!(cfg.timeouts.create, Duration::from_secs(2));
        assert_eq!(cfg.timeouts.poll, Duration::from_secs(10));
        assert_eq!(cfg.pacing.pause, Duration::ZERO);
        assert_eq!(cfg.pacing.jitter, Duration::from_millis(100));
        assert_eq!(cfg.pacing.after_failure, Duration::from_secs(2));
        assert_eq!(cfg.stage_markers.len(), 2);
        assert_eq!(cfg.stage_markers[1].condition, MarkerCondition::OnReward);
        assert_eq!(cfg.thresholds.len(), 2);
        assert_eq!(cfg.thresholds[0].metric, "e2e_latency_ms");
        assert_eq!(cfg.thresholds[0].expressions.len(), 2);
        assert!(!cfg.health_check);
    }

    #[test]
    fn empty_plan_keeps_preset() {
        let plan = parse("{}").unwrap_or_else(|e| panic!("{e:#}"));
        let mut cfg = base();
        plan.apply(&mut cfg);
        assert_eq!(cfg.ramp, base().ramp);
        assert_eq!(cfg.thresholds, base().thresholds);
    }

    #[test]
    fn unknown_fields_and_bad_durations_are_rejected() {
        assert!(parse("vus: 10\nunknown: 1").is_err());
        assert!(parse("stages: [{ duration: soon, target: 1 }]").is_err());
        assert!(parse("gracefulRampDown: -1").is_err());
    }
}
