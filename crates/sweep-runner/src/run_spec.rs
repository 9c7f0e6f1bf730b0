use crate::config::SweepConfig;
use crate::error::ConfigError;
use crate::expand::{check_required, expand_runs, Expansion, REQUIRED_PARAMS};
use crate::params::{ParamMap, ParamValue};
use crate::run_id::stable_run_id;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Boolean parameters emitted as a bare flag when true.
pub const BOOL_FLAGS: [(&str, &str); 1] = [("enable_model_routing", "--enable_model_routing")];

/// A fully resolved run. Built only through `build_run_spec`, so `run_id`,
/// the directories and `cmd` always agree with the parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSpec {
    pub params: ParamMap,
    pub ablation_name: String,
    pub ablation_flags: Vec<String>,
    pub run_id: String,
    pub run_dir: PathBuf,
    pub out_dir: PathBuf,
    pub cmd: Vec<String>,
}

impl RunSpec {
    pub fn meta_path(&self) -> PathBuf {
        self.run_dir.join("meta.json")
    }

    pub fn stdout_path(&self) -> PathBuf {
        self.run_dir.join("stdout.txt")
    }

    pub fn stderr_path(&self) -> PathBuf {
        self.run_dir.join("stderr.txt")
    }

    pub fn summary_path(&self) -> PathBuf {
        self.out_dir.join("summary.csv")
    }
}

pub fn runs_dir(exp_dir: &Path) -> PathBuf {
    exp_dir.join("runs")
}

pub fn build_cmd(
    sim_binary: &str,
    params: &ParamMap,
    out_dir: &Path,
    ablation_flags: &[String],
) -> Result<Vec<String>, ConfigError> {
    let mut cmd = vec![sim_binary.to_string()];
    for key in REQUIRED_PARAMS {
        let value = params
            .get(key)
            .ok_or_else(|| ConfigError::MissingParam(key.to_string()))?;
        cmd.push(format!("--{}", key));
        cmd.push(value.token());
    }
    for (key, flag) in BOOL_FLAGS {
        if params.get(key).map(ParamValue::is_truthy).unwrap_or(false) {
            cmd.push(flag.to_string());
        }
    }
    cmd.extend(ablation_flags.iter().cloned());
    cmd.push("--out_dir".to_string());
    cmd.push(out_dir.to_string_lossy().to_string());
    Ok(cmd)
}

pub fn build_run_spec(
    expansion: &Expansion,
    sim_binary: &str,
    exp_dir: &Path,
) -> Result<RunSpec, ConfigError> {
    check_required(&expansion.params)?;
    let mut params = expansion.params.clone();
    // The policy is a name on the command line; record it as one.
    if let Some(policy) = params.get_mut("policy") {
        if !matches!(policy, ParamValue::Str(_)) {
            *policy = ParamValue::Str(policy.token());
        }
    }
    let ablation_name = expansion.ablation.name.clone();
    let ablation_flags = expansion.ablation.flags.clone();
    let run_id = stable_run_id(&params, &ablation_name, &ablation_flags);
    let run_dir = runs_dir(exp_dir).join(&run_id);
    let out_dir = run_dir.join("out");
    let cmd = build_cmd(sim_binary, &params, &out_dir, &ablation_flags)?;
    Ok(RunSpec {
        params,
        ablation_name,
        ablation_flags,
        run_id,
        run_dir,
        out_dir,
        cmd,
    })
}

/// Expands the configuration and builds every RunSpec. Fails before anything
/// touches the filesystem if the configuration is malformed or two runs
/// would share a run directory.
pub fn make_run_specs(config: &SweepConfig, exp_dir: &Path) -> Result<Vec<RunSpec>, ConfigError> {
    let sim_binary = config.sim_binary();
    let mut seen = BTreeSet::new();
    let mut specs = Vec::new();
    for expansion in expand_runs(config)? {
        let spec = build_run_spec(&expansion, sim_binary, exp_dir)?;
        if !seen.insert(spec.run_id.clone()) {
            return Err(ConfigError::DuplicateRunId(spec.run_id));
        }
        specs.push(spec);
    }
    Ok(specs)
}
