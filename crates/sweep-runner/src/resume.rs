use crate::run_spec::RunSpec;
use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use sweep_core::{canonical_json_string, load_json_file};

/// Why a run may or may not be skipped on resume.
#[derive(Debug, Clone, PartialEq)]
pub enum ResumeDecision {
    Disabled,
    MissingSummary,
    EmptySummary,
    MissingMeta,
    UnreadableMeta(String),
    Mismatch,
    Interrupted,
    PreviousFailure(i64),
    Reusable,
}

impl ResumeDecision {
    pub fn can_skip(&self) -> bool {
        matches!(self, Self::Reusable)
    }

    pub fn reason(&self) -> String {
        match self {
            Self::Disabled => "resume disabled".to_string(),
            Self::MissingSummary => "no summary.csv".to_string(),
            Self::EmptySummary => "summary.csv has no data row".to_string(),
            Self::MissingMeta => "no meta.json".to_string(),
            Self::UnreadableMeta(e) => format!("unreadable meta.json: {}", e),
            Self::Mismatch => "meta.json does not match current run".to_string(),
            Self::Interrupted => "previous attempt never completed".to_string(),
            Self::PreviousFailure(code) => format!("previous attempt exited {}", code),
            Self::Reusable => "completed with matching meta.json".to_string(),
        }
    }
}

/// The fields of a RunSpec that a stored record must reproduce exactly.
pub fn identity_fields(spec: &RunSpec) -> Value {
    json!({
        "params": spec.params,
        "ablation_name": spec.ablation_name,
        "ablation_flags": spec.ablation_flags,
        "cmd": spec.cmd,
    })
}

/// Structural comparison of a stored record against a RunSpec, through the
/// canonical serialization of the identity fields.
pub fn meta_matches(meta: &Value, spec: &RunSpec) -> bool {
    let want = identity_fields(spec);
    let have = json!({
        "params": meta.get("params").cloned().unwrap_or(Value::Null),
        "ablation_name": meta.get("ablation_name").cloned().unwrap_or(Value::Null),
        "ablation_flags": meta.get("ablation_flags").cloned().unwrap_or(Value::Null),
        "cmd": meta.get("cmd").cloned().unwrap_or(Value::Null),
    });
    canonical_json_string(&have) == canonical_json_string(&want)
}

/// A summary counts only if it has a header and at least one data row.
pub fn summary_has_data(path: &Path) -> bool {
    match fs::read_to_string(path) {
        Ok(text) => text.lines().filter(|l| !l.trim().is_empty()).count() >= 2,
        Err(_) => false,
    }
}

/// Decides whether a previous attempt can stand in for this run. Any doubt
/// about the stored state resolves to running again.
pub fn evaluate_resume(spec: &RunSpec, resume: bool) -> ResumeDecision {
    if !resume {
        return ResumeDecision::Disabled;
    }
    let summary = spec.summary_path();
    if !summary.is_file() {
        return ResumeDecision::MissingSummary;
    }
    if !summary_has_data(&summary) {
        return ResumeDecision::EmptySummary;
    }
    let meta_path = spec.meta_path();
    if !meta_path.is_file() {
        return ResumeDecision::MissingMeta;
    }
    let meta = match load_json_file(&meta_path) {
        Ok(v) => v,
        Err(e) => return ResumeDecision::UnreadableMeta(e.to_string()),
    };
    if !meta_matches(&meta, spec) {
        return ResumeDecision::Mismatch;
    }
    match meta.get("exit_code").and_then(Value::as_i64) {
        None => ResumeDecision::Interrupted,
        Some(0) => ResumeDecision::Reusable,
        Some(code) => ResumeDecision::PreviousFailure(code),
    }
}

pub fn should_skip(spec: &RunSpec, resume: bool) -> bool {
    evaluate_resume(spec, resume).can_skip()
}
