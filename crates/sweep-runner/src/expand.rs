use crate::config::SweepConfig;
use crate::error::ConfigError;
use crate::params::{ParamMap, ParamValue};
use serde_json::{Map, Value};

/// Parameters every run must carry, in the order they are passed to the
/// simulator.
pub const REQUIRED_PARAMS: [&str; 9] = [
    "workflows",
    "pdfs",
    "iters",
    "subqueries",
    "policy",
    "seed",
    "time_scale",
    "heavy_tail_prob",
    "heavy_tail_mult",
];

pub const BASELINE_ABLATION: &str = "baseline";

#[derive(Debug, Clone, PartialEq)]
pub struct Ablation {
    pub name: String,
    pub flags: Vec<String>,
}

impl Ablation {
    pub fn baseline() -> Self {
        Self {
            name: BASELINE_ABLATION.to_string(),
            flags: Vec::new(),
        }
    }
}

/// One concrete combination: parameters plus the ablation applied to them.
#[derive(Debug, Clone, PartialEq)]
pub struct Expansion {
    pub params: ParamMap,
    pub ablation: Ablation,
}

/// Expands the configuration into the full, ordered run set.
///
/// Matrix keys (other than the reserved `ablations` and `seeds`) are iterated
/// in sorted order, so the output order depends only on the configuration
/// contents. The nesting is combination, then seed, then ablation. Required
/// parameters are checked across the whole set before anything is returned.
pub fn expand_runs(config: &SweepConfig) -> Result<Vec<Expansion>, ConfigError> {
    let common = to_param_map(&config.common_args)?;
    let mut matrix = config.matrix.clone();

    let ablations = match matrix.remove("ablations") {
        Some(raw) => parse_ablations(&raw)?,
        None => vec![Ablation::baseline()],
    };

    let seeds = match matrix.remove("seeds") {
        Some(Value::Array(items)) if !items.is_empty() => items
            .iter()
            .map(|v| ParamValue::from_json("seeds", v))
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => return Err(ConfigError::EmptySeeds),
        None => vec![common.get("seed").cloned().unwrap_or(ParamValue::Int(1))],
    };

    // serde_json maps are not guaranteed to iterate sorted, so sort explicitly.
    let mut keys: Vec<&String> = matrix.keys().collect();
    keys.sort();
    let mut axes: Vec<(&str, Vec<ParamValue>)> = Vec::with_capacity(keys.len());
    for key in keys {
        let values = match &matrix[key.as_str()] {
            Value::Array(items) if !items.is_empty() => items
                .iter()
                .map(|v| ParamValue::from_json(key, v))
                .collect::<Result<Vec<_>, _>>()?,
            _ => return Err(ConfigError::EmptyMatrixList(key.clone())),
        };
        axes.push((key.as_str(), values));
    }

    let mut runs = Vec::new();
    for combo in cartesian_product(&axes) {
        let mut base = common.clone();
        for (key, value) in combo {
            base.insert(key.to_string(), value.clone());
        }
        for seed in &seeds {
            let mut params = base.clone();
            params.insert("seed".to_string(), seed.clone());
            for ablation in &ablations {
                runs.push(Expansion {
                    params: params.clone(),
                    ablation: ablation.clone(),
                });
            }
        }
    }

    for run in &runs {
        check_required(&run.params)?;
    }
    Ok(runs)
}

pub fn check_required(params: &ParamMap) -> Result<(), ConfigError> {
    match REQUIRED_PARAMS.iter().find(|k| !params.contains_key(**k)) {
        Some(missing) => Err(ConfigError::MissingParam(missing.to_string())),
        None => Ok(()),
    }
}

fn to_param_map(raw: &Map<String, Value>) -> Result<ParamMap, ConfigError> {
    raw.iter()
        .map(|(k, v)| Ok((k.clone(), ParamValue::from_json(k, v)?)))
        .collect()
}

fn parse_ablations(raw: &Value) -> Result<Vec<Ablation>, ConfigError> {
    let items = match raw {
        Value::Array(items) if !items.is_empty() => items,
        _ => return Err(ConfigError::EmptyAblations),
    };
    items.iter().map(parse_ablation).collect()
}

fn parse_ablation(raw: &Value) -> Result<Ablation, ConfigError> {
    let name = raw
        .as_object()
        .and_then(|obj| obj.get("name"))
        .filter(|v| !v.is_null())
        .ok_or(ConfigError::AblationMissingName)?;
    let name = match name {
        Value::String(s) => s.clone(),
        other => ParamValue::from_json("ablations.name", other)
            .map_err(|_| ConfigError::AblationMissingName)?
            .token(),
    };
    let flags = match raw.get("flags") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| match v {
                Value::String(s) => Ok(s.clone()),
                other => ParamValue::from_json("ablations.flags", other).map(|p| p.token()),
            })
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => return Err(ConfigError::AblationFlagsNotList(name)),
    };
    Ok(Ablation { name, flags })
}

/// Lexicographic cross-product: the last axis varies fastest. An empty axis
/// list yields exactly one empty combination.
fn cartesian_product<'a>(axes: &'a [(&'a str, Vec<ParamValue>)]) -> Vec<Vec<(&'a str, &'a ParamValue)>> {
    let mut combos: Vec<Vec<(&str, &ParamValue)>> = vec![Vec::new()];
    for (key, values) in axes {
        let mut next = Vec::with_capacity(combos.len() * values.len());
        for prefix in &combos {
            for value in values {
                let mut combo = prefix.clone();
                combo.push((*key, value));
                next.push(combo);
            }
        }
        combos = next;
    }
    combos
}
