use crate::error::ConfigError;
use crate::run_id::sanitize_token;
use anyhow::{Context, Result};
use serde::{de, Deserialize, Deserializer};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "bench/experiments/default.json";
pub const DEFAULT_SIM_BINARY: &str = "./build/agent_sched_sim";
pub const DEFAULT_OUT_ROOT: &str = "bench_runs";
pub const DEFAULT_EXP_NAME: &str = "exp";

/// The sweep configuration document. `matrix` keeps its raw JSON shape here;
/// the expander owns the validation of its entries, including the reserved
/// `ablations` and `seeds` keys.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SweepConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub out_root: Option<PathBuf>,
    #[serde(default)]
    pub sim_binary: Option<String>,
    #[serde(default, deserialize_with = "integral_jobs")]
    pub jobs: Option<i64>,
    #[serde(default)]
    pub common_args: Map<String, Value>,
    #[serde(default)]
    pub matrix: Map<String, Value>,
}

// `4.0` is accepted as `4`; a fractional count is rejected.
fn integral_jobs<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    let raw = match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => return Ok(None),
        Some(raw) => raw,
    };
    if let Some(n) = raw.as_i64() {
        return Ok(Some(n));
    }
    match raw.as_f64() {
        Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Ok(Some(f as i64)),
        _ => Err(de::Error::custom(format!("jobs must be an integer (got {})", raw))),
    }
}

impl SweepConfig {
    pub fn from_value(value: Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn sim_binary(&self) -> &str {
        self.sim_binary.as_deref().unwrap_or(DEFAULT_SIM_BINARY)
    }
}

/// Loads a configuration file. The document is parsed as YAML, which also
/// accepts plain JSON, then converted into a JSON tree.
pub fn load_config(path: &Path) -> Result<SweepConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let yaml_value: serde_yaml::Value = serde_yaml::from_str(&raw)
        .with_context(|| format!("failed to parse config {}", path.display()))?;
    let json_value: Value = serde_json::to_value(yaml_value)?;
    SweepConfig::from_value(json_value)
        .with_context(|| format!("invalid config {}", path.display()))
}

/// Operator overrides from the command line. Each one wins over the
/// corresponding configuration field.
#[derive(Debug, Clone, Default)]
pub struct SweepOverrides {
    pub exp_name: Option<String>,
    pub out_root: Option<PathBuf>,
    pub jobs: Option<i64>,
}

/// Experiment-level settings after applying overrides and defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedExperiment {
    pub exp_name: String,
    pub exp_dir: PathBuf,
    pub jobs: usize,
}

pub fn resolve_experiment(
    config: &SweepConfig,
    root: &Path,
    overrides: &SweepOverrides,
) -> Result<ResolvedExperiment, ConfigError> {
    let non_empty = |name: &Option<String>| name.clone().filter(|s| !s.is_empty());
    let exp_name = non_empty(&overrides.exp_name)
        .or_else(|| non_empty(&config.name))
        .unwrap_or_else(|| DEFAULT_EXP_NAME.to_string());
    let exp_token = sanitize_token(&exp_name);
    if exp_token.is_empty() {
        return Err(ConfigError::EmptyExperimentName(exp_name));
    }

    let out_root = overrides
        .out_root
        .clone()
        .or_else(|| config.out_root.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUT_ROOT));
    let out_root = resolve_against(root, &out_root);

    let jobs = overrides.jobs.or(config.jobs).unwrap_or(1);
    if jobs <= 0 {
        return Err(ConfigError::InvalidJobs(jobs));
    }

    Ok(ResolvedExperiment {
        exp_name,
        exp_dir: out_root.join(exp_token),
        jobs: jobs as usize,
    })
}

pub fn resolve_against(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}
