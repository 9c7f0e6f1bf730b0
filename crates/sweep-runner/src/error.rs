use std::path::PathBuf;
use thiserror::Error;

/// Defects in the sweep configuration. All of these are raised while the run
/// set is being planned, before any run directory exists.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("matrix.{0} must be a non-empty list")]
    EmptyMatrixList(String),
    #[error("matrix.seeds must be a non-empty list")]
    EmptySeeds,
    #[error("matrix.ablations must be a non-empty list")]
    EmptyAblations,
    #[error("each ablation must be an object with at least a 'name'")]
    AblationMissingName,
    #[error("ablation.flags must be a list for {0}")]
    AblationFlagsNotList(String),
    #[error("missing required param '{0}' (set in common_args or matrix)")]
    MissingParam(String),
    #[error("{key}: unsupported value {value} (expected string, integer, float or bool)")]
    UnsupportedValue { key: String, value: String },
    #[error("jobs must be > 0 (got {0})")]
    InvalidJobs(i64),
    #[error("experiment name '{0}' is empty after sanitization")]
    EmptyExperimentName(String),
    #[error("duplicate run_id {0}: two runs would share one run directory")]
    DuplicateRunId(String),
}

/// Orchestrator-side failures while executing one run. Any of these is
/// recorded as exit code 127 in the run's metadata.
#[derive(Debug, Error)]
pub enum RunFault {
    #[error("failed to create {path}: {source}")]
    CreateDirs {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write metadata {path}: {message}")]
    WriteMeta { path: PathBuf, message: String },
    #[error("failed to open log {path}: {source}")]
    OpenLog {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("failed waiting for {program}: {source}")]
    Wait {
        program: String,
        source: std::io::Error,
    },
    #[error("empty command")]
    EmptyCommand,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_messages_name_the_key() {
        assert_eq!(
            ConfigError::EmptyMatrixList("workflows".into()).to_string(),
            "matrix.workflows must be a non-empty list"
        );
        assert_eq!(
            ConfigError::MissingParam("heavy_tail_mult".into()).to_string(),
            "missing required param 'heavy_tail_mult' (set in common_args or matrix)"
        );
    }

    #[test]
    fn run_fault_includes_program() {
        let err = RunFault::Spawn {
            program: "./build/agent_sched_sim".into(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        };
        assert!(err.to_string().contains("./build/agent_sched_sim"));
    }
}
