use anyhow::Result;
use chrono::Utc;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)?;
    Ok(())
}

pub fn sha256_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Seconds since the unix epoch with microsecond resolution.
pub fn now_unix_s() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Rounds to microsecond precision.
pub fn round_micros(seconds: f64) -> f64 {
    (seconds * 1_000_000.0).round() / 1_000_000.0
}

/// Recursively rebuilds every object so its keys iterate in sorted order,
/// independent of how the map type in use orders insertions.
pub fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let ordered = map
                .into_iter()
                .map(|(key, value)| (key, canonicalize(value)))
                .collect::<BTreeMap<_, _>>();
            Value::Object(Map::from_iter(ordered))
        }
        Value::Array(values) => Value::Array(values.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// Compact JSON with sorted keys, `,`/`:` separators and non-ASCII characters
/// escaped as `\uXXXX`. Two values that are structurally equal always produce
/// the same string.
pub fn canonical_json_string(value: &Value) -> String {
    let compact = canonicalize(value.clone()).to_string();
    escape_non_ascii(&compact)
}

pub fn canonical_json_digest(value: &Value) -> String {
    sha256_bytes(canonical_json_string(value).as_bytes())
}

// Non-ASCII characters can only occur inside string literals of serialized
// JSON, so escaping them in place keeps the document valid.
fn escape_non_ascii(s: &str) -> String {
    if s.is_ascii() {
        return s.to_string();
    }
    let mut out = String::with_capacity(s.len() + 16);
    for ch in s.chars() {
        if ch.is_ascii() {
            out.push(ch);
        } else {
            let mut units = [0u16; 2];
            for unit in ch.encode_utf16(&mut units) {
                out.push_str(&format!("\\u{:04x}", unit));
            }
        }
    }
    out
}

/// Bytes written to a hidden sibling of `target` but not yet renamed over it.
/// Readers of `target` keep seeing the previous content until `commit`.
#[derive(Debug)]
pub struct StagedWrite {
    tmp: PathBuf,
    target: PathBuf,
    committed: bool,
}

impl StagedWrite {
    pub fn tmp_path(&self) -> &Path {
        &self.tmp
    }

    pub fn commit(mut self) -> Result<()> {
        fs::rename(&self.tmp, &self.target)?;
        self.committed = true;
        if let Some(parent) = self.target.parent() {
            if let Ok(dir) = fs::File::open(parent) {
                let _ = dir.sync_all();
            }
        }
        Ok(())
    }
}

impl Drop for StagedWrite {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.tmp);
        }
    }
}

pub fn stage_bytes(path: &Path, bytes: &[u8]) -> Result<StagedWrite> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let ts = Utc::now().timestamp_micros();
    let pid = std::process::id();
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("tmpfile");
    let tmp = path.with_file_name(format!(".{}.tmp.{}.{}", name, pid, ts));
    let mut file = fs::File::create(&tmp)?;
    let staged = StagedWrite {
        tmp,
        target: path.to_path_buf(),
        committed: false,
    };
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(staged)
}

pub fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    stage_bytes(path, bytes)?.commit()
}

/// Pretty-printed, key-sorted JSON with a trailing newline.
pub fn pretty_json_bytes(value: &Value) -> Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec_pretty(&canonicalize(value.clone()))?;
    bytes.push(b'\n');
    Ok(bytes)
}

pub fn atomic_write_json_pretty(path: &Path, value: &Value) -> Result<()> {
    atomic_write_bytes(path, &pretty_json_bytes(value)?)
}

pub fn load_json_file(path: &Path) -> Result<Value> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_json_sorts_nested_keys_and_is_compact() {
        let value = json!({"b": 1, "a": {"z": [1, 2], "y": "x"}});
        assert_eq!(
            canonical_json_string(&value),
            r#"{"a":{"y":"x","z":[1,2]},"b":1}"#
        );
    }

    #[test]
    fn canonical_json_keeps_float_fraction() {
        let value = json!({"t": 1.0, "p": 0.02, "n": 50});
        assert_eq!(canonical_json_string(&value), r#"{"n":50,"p":0.02,"t":1.0}"#);
    }

    #[test]
    fn canonical_json_escapes_non_ascii() {
        let value = json!({"name": "café 🚀"});
        assert_eq!(
            canonical_json_string(&value),
            r#"{"name":"caf\u00e9 \ud83d\ude80"}"#
        );
        let reparsed: Value =
            serde_json::from_str(&canonical_json_string(&value)).expect("still valid json");
        assert_eq!(reparsed, value);
    }

    #[test]
    fn digest_is_stable_across_insertion_order() {
        let mut a = Map::new();
        a.insert("x".to_string(), json!(1));
        a.insert("y".to_string(), json!(2));
        let mut b = Map::new();
        b.insert("y".to_string(), json!(2));
        b.insert("x".to_string(), json!(1));
        assert_eq!(
            canonical_json_digest(&Value::Object(a)),
            canonical_json_digest(&Value::Object(b))
        );
    }

    #[test]
    fn sha256_bytes_matches_known_vector() {
        assert_eq!(
            sha256_bytes(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn round_micros_truncates_to_six_places() {
        assert_eq!(round_micros(1.23456789), 1.234568);
        assert_eq!(round_micros(0.0), 0.0);
    }

    #[test]
    fn staged_write_is_invisible_until_commit() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("meta.json");
        atomic_write_json_pretty(&path, &json!({"phase": 1})).expect("initial write");

        let staged = stage_bytes(&path, b"{\"phase\": 2, \"trunc").expect("stage");
        assert!(staged.tmp_path().exists());
        let seen = load_json_file(&path).expect("previous record still readable");
        assert_eq!(seen, json!({"phase": 1}));

        drop(staged);
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .expect("read dir")
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(leftovers, vec!["meta.json".to_string()]);
    }

    #[test]
    fn commit_replaces_target() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("nested").join("meta.json");
        atomic_write_json_pretty(&path, &json!({"phase": 1})).expect("initial write");
        let staged = stage_bytes(&path, &pretty_json_bytes(&json!({"phase": 2})).expect("bytes"))
            .expect("stage");
        staged.commit().expect("commit");
        assert_eq!(load_json_file(&path).expect("load"), json!({"phase": 2}));
        let raw = fs::read_to_string(&path).expect("raw");
        assert!(raw.ends_with('\n'));
    }
}
