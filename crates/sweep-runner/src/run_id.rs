use crate::params::ParamMap;
use serde_json::json;
use sweep_core::canonical_json_digest;

/// Number of hex characters of the content digest kept in a run id.
pub const RUN_HASH_LEN: usize = 12;

/// Maps every character outside `[A-Za-z0-9_.-]` to `_` and trims leading and
/// trailing underscores.
pub fn sanitize_token(s: &str) -> String {
    let mapped: String = s
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    mapped.trim_matches('_').to_string()
}

/// Digest over the canonical form of everything that defines a run.
pub fn run_content_hash(params: &ParamMap, ablation_name: &str, ablation_flags: &[String]) -> String {
    let payload = json!({
        "params": params,
        "ablation_name": ablation_name,
        "ablation_flags": ablation_flags,
    });
    canonical_json_digest(&payload)[..RUN_HASH_LEN].to_string()
}

/// `<policy>__wf<workflows>__seed<seed>__<ablation>__<hash12>`. The readable
/// prefix is for humans; only the hash carries identity.
pub fn stable_run_id(params: &ParamMap, ablation_name: &str, ablation_flags: &[String]) -> String {
    let segment = |key: &str, fallback: &str| {
        params
            .get(key)
            .map(|v| sanitize_token(&v.token()))
            .unwrap_or_else(|| fallback.to_string())
    };
    format!(
        "{}__wf{}__seed{}__{}__{}",
        segment("policy", "unknown"),
        segment("workflows", "x"),
        segment("seed", "x"),
        sanitize_token(ablation_name),
        run_content_hash(params, ablation_name, ablation_flags)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParamValue;
    use std::collections::BTreeSet;

    fn params(pairs: &[(&str, ParamValue)]) -> ParamMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn sanitize_maps_and_trims() {
        assert_eq!(sanitize_token("dag cheapest/v2"), "dag_cheapest_v2");
        assert_eq!(sanitize_token("__no-hedge.x__"), "no-hedge.x");
        assert_eq!(sanitize_token("--disable_hedging"), "--disable_hedging");
        assert_eq!(sanitize_token("é"), "");
    }

    #[test]
    fn run_id_layout() {
        let p = params(&[
            ("policy", ParamValue::from("full")),
            ("workflows", ParamValue::Int(10)),
            ("seed", ParamValue::Int(1)),
        ]);
        let id = stable_run_id(&p, "baseline", &[]);
        assert!(id.starts_with("full__wf10__seed1__baseline__"), "{}", id);
        let hash = id.rsplit("__").next().expect("hash segment");
        assert_eq!(hash.len(), RUN_HASH_LEN);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn run_id_is_path_safe_for_hostile_values() {
        let p = params(&[
            ("policy", ParamValue::from("../../etc")),
            ("workflows", ParamValue::from("a/b")),
            ("seed", ParamValue::Int(7)),
        ]);
        let id = stable_run_id(&p, "no hedging!", &["--disable_hedging".to_string()]);
        assert!(!id.contains('/'));
        assert!(id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')));
    }

    #[test]
    fn missing_prefix_fields_fall_back() {
        let id = stable_run_id(&ParamMap::new(), "baseline", &[]);
        assert!(id.starts_with("unknown__wfx__seedx__baseline__"), "{}", id);
    }

    #[test]
    fn hash_depends_on_value_type_and_flags() {
        let int_seed = params(&[("seed", ParamValue::Int(1))]);
        let str_seed = params(&[("seed", ParamValue::from("1"))]);
        assert_ne!(
            run_content_hash(&int_seed, "baseline", &[]),
            run_content_hash(&str_seed, "baseline", &[])
        );
        assert_ne!(
            run_content_hash(&int_seed, "baseline", &[]),
            run_content_hash(&int_seed, "baseline", &["--disable_escalation".to_string()])
        );
        let a = vec!["--a".to_string(), "--b".to_string()];
        let b = vec!["--b".to_string(), "--a".to_string()];
        assert_ne!(
            run_content_hash(&int_seed, "x", &a),
            run_content_hash(&int_seed, "x", &b)
        );
    }

    #[test]
    fn no_hash_collisions_over_generated_matrix() {
        let policies = ["fifo_cheapest", "dag_cheapest", "dag_escalation", "full"];
        let ablations: [(&str, &[&str]); 4] = [
            ("baseline", &[]),
            ("no_hedging", &["--disable_hedging"]),
            ("no_escalation", &["--disable_escalation"]),
            ("no_dag", &["--disable_dag_priority"]),
        ];
        let mut seen = BTreeSet::new();
        let mut total = 0usize;
        for policy in policies {
            for workflows in [10i64, 50, 100, 200, 500] {
                for seed in 1i64..=10 {
                    for heavy_tail_prob in [0.0f64, 0.01, 0.02, 0.05] {
                        for (name, flags) in ablations {
                            let p = params(&[
                                ("policy", ParamValue::from(policy)),
                                ("workflows", ParamValue::Int(workflows)),
                                ("seed", ParamValue::Int(seed)),
                                ("heavy_tail_prob", ParamValue::Float(heavy_tail_prob)),
                                ("heavy_tail_mult", ParamValue::Float(50.0)),
                                ("time_scale", ParamValue::Float(1.0)),
                            ]);
                            let flags: Vec<String> = flags.iter().map(|f| f.to_string()).collect();
                            seen.insert(run_content_hash(&p, name, &flags));
                            total += 1;
                        }
                    }
                }
            }
        }
        assert_eq!(total, 4 * 5 * 10 * 4 * 4);
        assert_eq!(seen.len(), total, "hash12 collision in generated matrix");
    }
}
