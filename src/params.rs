//! Workflow parameter parsing and layering.
//!
//! Layers apply in order: params file, then `key=value` flags, then
//! built-ins. Built-ins always win so a params file cannot redirect `target`.

use crate::error::{Error, Result};
use crate::model::Params;
use std::path::Path;

/// Parse a `key=value` flag. Splits on the first `=`; the value may be empty.
pub fn parse_kv(raw: &str) -> Result<(String, String)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| Error::Config(format!("param '{raw}' is not in key=value form")))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(Error::Config(format!("param '{raw}' has an empty key")));
    }
    Ok((key.to_string(), value.to_string()))
}

/// Parse every `key=value` flag into a map. Later duplicates win.
pub fn parse_kv_list<S: AsRef<str>>(raw: &[S]) -> Result<Params> {
    raw.iter()
        .map(|entry| parse_kv(entry.as_ref()))
        .collect()
}

/// Load a flat params file: JSON for `.json`, TOML otherwise.
///
/// Scalar values are rendered to strings; nested tables and arrays are
/// rejected.
pub fn load_params_file(path: &Path) -> Result<Params> {
    let content = std::fs::read_to_string(path)?;
    let is_json = path.extension().is_some_and(|ext| ext == "json");

    let value: serde_json::Value = if is_json {
        serde_json::from_str(&content)?
    } else {
        let table: toml::Table = toml::from_str(&content).map_err(|e| {
            Error::Config(format!("bad params file {}: {e}", path.display()))
        })?;
        serde_json::to_value(table)?
    };

    let serde_json::Value::Object(map) = value else {
        return Err(Error::Config(format!(
            "params file {} must contain a table of key/value pairs",
            path.display()
        )));
    };

    map.into_iter()
        .map(|(key, value)| {
            let rendered = match value {
                serde_json::Value::String(s) => s,
                serde_json::Value::Bool(b) => b.to_string(),
                serde_json::Value::Number(n) => n.to_string(),
                serde_json::Value::Null => String::new(),
                _ => {
                    return Err(Error::Config(format!(
                        "param '{key}' in {} is not a scalar",
                        path.display()
                    )));
                }
            };
            Ok((key, rendered))
        })
        .collect()
}

/// Built-in parameters derived from the run itself.
pub fn builtins(target: &str, input_file_path: Option<&str>, workspace: &str) -> Params {
    let mut params = Params::new();
    params.insert("target".to_string(), target.to_string());
    params.insert("workspace".to_string(), workspace.to_string());
    if let Some(path) = input_file_path {
        params.insert("target_file".to_string(), path.to_string());
    }
    params
}

/// Merge parameter layers; each later layer overrides earlier ones.
pub fn merge_params(file: &Params, cli: &Params, builtins: &Params) -> Params {
    let mut merged = file.clone();
    merged.extend(cli.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged.extend(builtins.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}
