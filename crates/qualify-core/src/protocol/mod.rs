//! Protocol loading.
//!
//! Definitions are parsed from JSON or YAML, validated in full, and only then handed
//! out. [`ProtocolLoader`] caches them by `(id, version)` in an explicit
//! [`ProtocolCache`]; a cached definition is replaced only through
//! [`ProtocolLoader::reload`].

pub mod cache;
pub mod validate;

pub use cache::{CacheEntry, ProtocolCache};
pub use validate::validate;

use crate::errors::diagnostic::codes;
use crate::errors::{Diagnostic, ProtocolError};
use crate::fingerprint::protocol_digest;
use crate::model::{ProtocolDefinition, ProtocolKey};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolFormat {
    Json,
    Yaml,
}

impl ProtocolFormat {
    /// `.yaml`/`.yml` are YAML, everything else is treated as JSON.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") => {
                ProtocolFormat::Yaml
            }
            _ => ProtocolFormat::Json,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ProtocolFormat::Json => "JSON",
            ProtocolFormat::Yaml => "YAML",
        }
    }
}

/// Parse and validate a protocol document.
pub fn parse(text: &str, format: ProtocolFormat) -> Result<ProtocolDefinition, ProtocolError> {
    let protocol: ProtocolDefinition = match format {
        ProtocolFormat::Json => serde_json::from_str(text).map_err(json_error)?,
        ProtocolFormat::Yaml => serde_yaml::from_str(text).map_err(yaml_error)?,
    };
    validate(&protocol)?;
    Ok(protocol)
}

/// Read, parse and validate a protocol file without caching it.
pub fn load(path: &Path) -> Result<ProtocolDefinition, ProtocolError> {
    let text = read_source(path)?;
    parse(&text, ProtocolFormat::from_path(path))
}

fn read_source(path: &Path) -> Result<String, ProtocolError> {
    std::fs::read_to_string(path).map_err(|source| ProtocolError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn json_error(e: serde_json::Error) -> ProtocolError {
    use serde_json::error::Category;
    match e.classify() {
        Category::Data => ProtocolError::schema(
            format!("line {} column {}", e.line(), e.column()),
            e.to_string(),
        ),
        _ => ProtocolError::Parse {
            format: "JSON",
            message: e.to_string(),
        },
    }
}

fn yaml_error(e: serde_yaml::Error) -> ProtocolError {
    let message = e.to_string();
    let is_shape_error = ["missing field", "invalid type", "unknown variant", "did not match"]
        .iter()
        .any(|needle| message.contains(needle));
    if is_shape_error {
        let location = e
            .location()
            .map(|l| format!("line {} column {}", l.line(), l.column()))
            .unwrap_or_else(|| "document".to_string());
        ProtocolError::schema(location, message)
    } else {
        ProtocolError::Parse {
            format: "YAML",
            message,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReloadOutcome {
    pub protocol: Arc<ProtocolDefinition>,
    /// False when the reloaded content is byte-identical to the cached one.
    pub changed: bool,
}

/// Loads protocols and owns the cache they are kept in.
#[derive(Debug, Default)]
pub struct ProtocolLoader {
    cache: ProtocolCache,
}

impl ProtocolLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cache(cache: ProtocolCache) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &ProtocolCache {
        &self.cache
    }

    pub fn get(&self, id: &str, version: &str) -> Option<Arc<ProtocolDefinition>> {
        self.cache.get(&ProtocolKey::new(id, version))
    }

    pub fn load_str(
        &mut self,
        text: &str,
        format: ProtocolFormat,
    ) -> Result<Arc<ProtocolDefinition>, ProtocolError> {
        self.load_text(text, format, None)
    }

    pub fn load_path(&mut self, path: &Path) -> Result<Arc<ProtocolDefinition>, ProtocolError> {
        let text = read_source(path)?;
        self.load_text(&text, ProtocolFormat::from_path(path), Some(path.to_path_buf()))
    }

    fn load_text(
        &mut self,
        text: &str,
        format: ProtocolFormat,
        source: Option<PathBuf>,
    ) -> Result<Arc<ProtocolDefinition>, ProtocolError> {
        let protocol = parse(text, format)?;
        let key = protocol.key();
        let digest = protocol_digest(text);

        if let Some(entry) = self.cache.entry(&key) {
            if entry.digest != digest {
                tracing::warn!(
                    protocol = %key,
                    "protocol content differs from the cached definition; reload to replace it"
                );
            }
            return Ok(Arc::clone(&entry.protocol));
        }

        tracing::info!(
            protocol = %key,
            phases = protocol.phases.len(),
            steps = protocol.step_count(),
            criteria = protocol.acceptance_criteria.len(),
            "protocol loaded"
        );
        Ok(self.cache.put(protocol, digest, source))
    }

    /// Load every `*.json`, `*.yaml` and `*.yml` file in `dir`, in file-name order.
    /// Stops at the first invalid file.
    pub fn load_dir(&mut self, dir: &Path) -> Result<Vec<Arc<ProtocolDefinition>>, ProtocolError> {
        let io_err = |source| ProtocolError::Io {
            path: dir.to_path_buf(),
            source,
        };
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            let is_protocol = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| matches!(e, "json" | "yaml" | "yml"));
            if path.is_file() && is_protocol {
                paths.push(path);
            }
        }
        paths.sort();

        paths.iter().map(|p| self.load_path(p)).collect()
    }

    /// Re-read `path`, replacing whatever the cache holds for its key. A file that fails
    /// to load leaves the cache untouched.
    pub fn reload(&mut self, path: &Path) -> Result<ReloadOutcome, ProtocolError> {
        let text = read_source(path)?;
        let protocol = parse(&text, ProtocolFormat::from_path(path))?;
        let key = protocol.key();
        let digest = protocol_digest(&text);

        let previous = self
            .cache
            .invalidate(&key)
            .or_else(|| self.cache.invalidate_source(path));
        self.cache.invalidate_source(path);
        let changed = previous.map_or(true, |e| e.digest != digest);
        if changed {
            tracing::info!(protocol = %key, path = %path.display(), "protocol reloaded");
        }

        let protocol = self.cache.put(protocol, digest, Some(path.to_path_buf()));
        Ok(ReloadOutcome { protocol, changed })
    }

    pub fn invalidate(&mut self, key: &ProtocolKey) -> bool {
        self.cache.invalidate(key).is_some()
    }
}

/// Non-fatal findings about a valid protocol.
pub fn lint(protocol: &ProtocolDefinition) -> Vec<Diagnostic> {
    let mut out = Vec::new();

    if protocol.acceptance_criteria.is_empty() {
        out.push(
            Diagnostic::new(
                codes::W_PROTO_NO_CRITERIA,
                format!(
                    "protocol '{}' has no acceptance criteria; runs will end NOT_EVALUATED",
                    protocol.id
                ),
            )
            .with_severity("warn")
            .with_source("protocol"),
        );
    }

    let declared: HashSet<&str> = protocol
        .parameters
        .iter()
        .map(|p| p.name.as_str())
        .chain(protocol.measurement_specs.iter().map(|s| s.parameter.as_str()))
        .collect();
    for c in &protocol.acceptance_criteria {
        if !declared.contains(c.threshold.parameter.as_str()) {
            out.push(
                Diagnostic::new(
                    codes::W_PROTO_UNDECLARED_PARAMETER,
                    format!(
                        "criterion '{}' references '{}', which is neither a parameter nor a measurement spec",
                        c.id, c.threshold.parameter
                    ),
                )
                .with_severity("warn")
                .with_source("protocol")
                .with_context(serde_json::json!({ "criterion": c.id })),
            );
        }
    }
    out
}
