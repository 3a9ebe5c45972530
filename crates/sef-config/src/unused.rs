//! Unused-key guard.
//!
//! Consumed keys are JSON Pointer prefixes. A leaf is consumed when some
//! registered prefix covers it; every other leaf is reported as unused,
//! which usually means a typo (`finallity_time_ms`) that would otherwise be
//! silently ignored and fall back to a default.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

/// Pointers read by the finality daemon. Only list what code actually reads.
pub const CONSUMED_POINTERS: &[&str] = &[
    // sef-config::settings::JobSettings::from_config_json
    "/storage_events",
    // sef-config::secrets::resolve_database_url
    "/database/url_env",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnusedKeyPolicy {
    Warn,
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnusedKeyReport {
    /// Consumed prefixes the analysis ran against (sorted, unique).
    pub consumed_prefixes: Vec<String>,
    /// Leaf pointers no prefix covers (sorted).
    pub unused_leaf_pointers: Vec<String>,
}

impl UnusedKeyReport {
    pub fn is_clean(&self) -> bool {
        self.unused_leaf_pointers.is_empty()
    }
}

/// Report config leaves that nothing reads.
///
/// `Fail` turns a non-clean report into an error; `Warn` always returns it.
pub fn report_unused_keys(config_json: &Value, policy: UnusedKeyPolicy) -> Result<UnusedKeyReport> {
    let consumed: BTreeSet<String> = CONSUMED_POINTERS
        .iter()
        .map(|p| normalize_pointer(p))
        .collect();

    let unused: BTreeSet<String> = leaf_pointers(config_json)
        .into_iter()
        .filter(|leaf| !consumed.iter().any(|c| covers(c, leaf)))
        .collect();

    let report = UnusedKeyReport {
        consumed_prefixes: consumed.into_iter().collect(),
        unused_leaf_pointers: unused.into_iter().collect(),
    };

    if policy == UnusedKeyPolicy::Fail && !report.is_clean() {
        bail!(
            "CONFIG_UNUSED_KEYS: {} unused config leaf key(s): {:?}",
            report.unused_leaf_pointers.len(),
            report.unused_leaf_pointers.iter().take(12).collect::<Vec<_>>()
        );
    }

    Ok(report)
}

/// Leading "/" enforced, trailing "/" dropped.
fn normalize_pointer(p: &str) -> String {
    let trimmed = p.trim().trim_end_matches('/');
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// "/a/b" covers "/a/b" and "/a/b/c" but not "/a/bc". "/" covers everything.
fn covers(prefix: &str, leaf: &str) -> bool {
    if prefix == "/" || leaf == prefix {
        return true;
    }
    leaf.strip_prefix(prefix)
        .map(|rest| rest.starts_with('/'))
        .unwrap_or(false)
}

/// Every scalar leaf of `v` as a JSON Pointer. The root scalar is "/".
pub(crate) fn leaf_pointers(v: &Value) -> Vec<String> {
    fn walk(v: &Value, prefix: &str, out: &mut Vec<String>) {
        match v {
            Value::Object(map) if !map.is_empty() => {
                for (k, child) in map {
                    let escaped = k.replace('~', "~0").replace('/', "~1");
                    walk(child, &format!("{prefix}/{escaped}"), out);
                }
            }
            Value::Array(items) if !items.is_empty() => {
                for (i, child) in items.iter().enumerate() {
                    walk(child, &format!("{prefix}/{i}"), out);
                }
            }
            _ => out.push(if prefix.is_empty() {
                "/".to_string()
            } else {
                prefix.to_string()
            }),
        }
    }

    let mut out = Vec::new();
    if v.as_object().is_some_and(|m| m.is_empty()) {
        return out;
    }
    walk(v, "", &mut out);
    out
}
