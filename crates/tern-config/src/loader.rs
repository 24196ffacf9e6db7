// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;

use crate::Config;

/// Ordered list of config file locations searched from lowest to highest
/// priority. Later files override earlier ones.
fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    paths.push(PathBuf::from("/etc/tern/config.yaml"));
    paths.push(PathBuf::from("/etc/tern/config.yml"));

    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".config/tern/config.yaml"));
        paths.push(home.join(".config/tern/config.yml"));
    }

    paths.push(PathBuf::from(".tern/config.yaml"));
    paths.push(PathBuf::from(".tern/config.yml"));
    paths.push(PathBuf::from("tern.yaml"));
    paths.push(PathBuf::from("tern.yml"));

    paths
}

/// The tern configuration directory (`~/.config/tern`).
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".config/tern"))
        .unwrap_or_else(|| PathBuf::from(".tern"))
}

/// Root directory for per-session state (snapshots, rewind metadata).
pub fn sessions_dir(config: &Config) -> PathBuf {
    config
        .sessions_dir
        .clone()
        .unwrap_or_else(|| config_dir().join("sessions"))
}

/// Load configuration by merging all discovered YAML files.
/// The `extra` argument may provide an explicit path (the `--config` flag).
///
/// `${VAR}` and `$VAR` references inside string values are expanded from the
/// environment after merging, so credentials can stay out of config files.
pub fn load(extra: Option<&Path>) -> anyhow::Result<Config> {
    let mut merged = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());

    for path in config_search_paths() {
        if path.is_file() {
            debug!(path = %path.display(), "loading config layer");
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let layer: serde_yaml::Value = serde_yaml::from_str(&text)
                .with_context(|| format!("parsing {}", path.display()))?;
            merge_yaml(&mut merged, layer);
        }
    }

    if let Some(p) = extra {
        debug!(path = %p.display(), "loading explicit config");
        let text =
            std::fs::read_to_string(p).with_context(|| format!("reading {}", p.display()))?;
        let layer: serde_yaml::Value =
            serde_yaml::from_str(&text).with_context(|| format!("parsing {}", p.display()))?;
        merge_yaml(&mut merged, layer);
    }

    let merged = expand_env(merged);

    let config: Config = if matches!(merged, serde_yaml::Value::Mapping(ref m) if m.is_empty()) {
        Config::default()
    } else {
        serde_yaml::from_value(merged).unwrap_or_default()
    };
    config.validate()?;
    Ok(config)
}

/// Deep-merge `src` into `dst`; src wins on scalar conflicts.
fn merge_yaml(dst: &mut serde_yaml::Value, src: serde_yaml::Value) {
    match (dst, src) {
        (serde_yaml::Value::Mapping(d), serde_yaml::Value::Mapping(s)) => {
            for (k, v) in s {
                let entry = d
                    .entry(k)
                    .or_insert(serde_yaml::Value::Mapping(serde_yaml::Mapping::new()));
                merge_yaml(entry, v);
            }
        }
        (dst, src) => *dst = src,
    }
}

/// Recursively expand `${VAR}` / `$VAR` in string values. Unset variables
/// are left verbatim so misconfigurations stay visible.
fn expand_env(value: serde_yaml::Value) -> serde_yaml::Value {
    match value {
        serde_yaml::Value::String(s) => serde_yaml::Value::String(expand_env_str(&s)),
        serde_yaml::Value::Mapping(m) => serde_yaml::Value::Mapping(
            m.into_iter().map(|(k, v)| (k, expand_env(v))).collect(),
        ),
        serde_yaml::Value::Sequence(seq) => {
            serde_yaml::Value::Sequence(seq.into_iter().map(expand_env).collect())
        }
        other => other,
    }
}

fn expand_env_str(s: &str) -> String {
    let re = regex::Regex::new(r"\$\{([^}]+)\}|\$([A-Za-z_][A-Za-z0-9_]*)")
        .expect("static pattern");
    re.replace_all(s, |caps: &regex::Captures| {
        let name = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str())
            .unwrap_or_default();
        std::env::var(name).unwrap_or_else(|_| caps[0].to_string())
    })
    .into_owned()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
