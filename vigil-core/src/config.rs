//! Configuration loading and validation.
//!
//! A config is a single TOML file or a directory of `*.toml` fragments
//! (read in sorted filename order, resources concatenated). Normalization
//! happens here so everything downstream can assume the §3 invariants:
//! keys rooted, `watch_keys` defaulted, idle backends coerced onto the
//! default interval.

use std::path::Path;

use crate::error::{io_err, ConfigError};
use crate::types::{parse_octal_mode, Config, ResourceSpec};

/// Load and validate configuration from a file or directory.
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    let mut config = if path.is_dir() {
        load_dir(path)?
    } else {
        load_file(path)?
    };
    normalize(&mut config)?;
    Ok(config)
}

fn load_file(path: &Path) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn load_dir(dir: &Path) -> Result<Config, ConfigError> {
    let mut paths = Vec::new();
    let entries = std::fs::read_dir(dir).map_err(|e| io_err(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| io_err(dir, e))?;
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut merged = Config::default();
    for path in paths {
        let fragment = load_file(&path)?;
        merged.resources.extend(fragment.resources);
        if fragment.pid_file.is_some() {
            merged.pid_file = fragment.pid_file;
        }
    }
    Ok(merged)
}

fn normalize(config: &mut Config) -> Result<(), ConfigError> {
    let mut seen = std::collections::HashSet::new();
    for resource in &mut config.resources {
        normalize_resource(resource)?;
        if !seen.insert(resource.name.0.clone()) {
            return Err(ConfigError::Invalid(format!(
                "duplicate resource name '{}'",
                resource.name
            )));
        }
    }
    Ok(())
}

fn normalize_resource(resource: &mut ResourceSpec) -> Result<(), ConfigError> {
    if resource.name.0.trim().is_empty() {
        return Err(ConfigError::Invalid("resource name is empty".to_string()));
    }

    for backend in &mut resource.backends {
        if backend.settings.name.is_empty() {
            backend.settings.name = backend.kind.kind_name().to_string();
        }
        backend.settings.normalize();
    }

    for template in &resource.templates {
        if template.src.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "resource '{}': template src is empty",
                resource.name
            )));
        }
        if template.dst.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "resource '{}': template dst is empty",
                resource.name
            )));
        }
        if !template.mode.is_empty() && parse_octal_mode(&template.mode).is_none() {
            return Err(ConfigError::Invalid(format!(
                "resource '{}': mode '{}' is not octal",
                resource.name, template.mode
            )));
        }
    }

    Ok(())
}
