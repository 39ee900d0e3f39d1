use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_yaml::Value;
use tracing::debug;

use crate::error::{GradeError, Result};

pub const DEFAULT_CONFIG: &str = "assign_config.yaml";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ComponentConfig {
    pub scaled_to: f64,
    pub actual_max: f64,
    #[serde(default)]
    pub plot_qs: Vec<String>,
    #[serde(default)]
    pub manual_qs: Vec<String>,
}

/// Assignment configuration. Keys ending in `_path` are resolved against the
/// directory holding the config file before deserialising.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Config {
    pub base_path: PathBuf,
    #[serde(default)]
    pub components_path: Option<PathBuf>,
    #[serde(default = "default_student_id_col")]
    pub student_id_col: String,
    #[serde(default = "default_mark_fname")]
    pub mark_fname: String,
    #[serde(default)]
    pub round_final: bool,
    #[serde(default = "default_notebook_exts")]
    pub notebook_exts: Vec<String>,
    pub components: BTreeMap<String, ComponentConfig>,
}

fn default_student_id_col() -> String {
    "SIS Login ID".to_string()
}

fn default_mark_fname() -> String {
    "final.csv".to_string()
}

fn default_notebook_exts() -> Vec<String> {
    vec![".rmd".to_string(), ".ipynb".to_string()]
}

pub fn read_config(path: &Path) -> Result<Config> {
    let text = fs::read_to_string(path).map_err(GradeError::read(path))?;
    let absolute = std::path::absolute(path)?;
    let config_dir = absolute.parent().unwrap_or(Path::new("/"));
    debug!(path = %absolute.display(), "loading config");
    parse_config(&text, config_dir)
}

pub fn parse_config(text: &str, config_dir: &Path) -> Result<Config> {
    let mut value: Value = serde_yaml::from_str(text)?;
    resolve_paths(&mut value, config_dir)?;
    let config: Config = serde_yaml::from_value(value)?;
    config.validate()?;
    Ok(config)
}

fn resolve_paths(value: &mut Value, config_dir: &Path) -> Result<()> {
    let mapping = value
        .as_mapping_mut()
        .ok_or_else(|| GradeError::Config("top level must be a mapping".to_string()))?;

    for (key, entry) in mapping.iter_mut() {
        let Some(key) = key.as_str() else { continue };
        if !key.ends_with("_path") {
            continue;
        }
        if let Some(raw) = entry.as_str() {
            let path = Path::new(raw);
            if path.is_relative() {
                *entry = Value::String(config_dir.join(path).to_string_lossy().into_owned());
            }
        }
    }

    Ok(())
}

impl Config {
    fn validate(&self) -> Result<()> {
        if self.components.is_empty() {
            return Err(GradeError::Config("no components configured".to_string()));
        }

        for (name, component) in &self.components {
            if !(component.actual_max.is_finite() && component.actual_max > 0.0) {
                return Err(GradeError::Config(format!(
                    "component `{name}`: actual_max must be positive, got {}",
                    component.actual_max
                )));
            }
            if !(component.scaled_to.is_finite() && component.scaled_to >= 0.0) {
                return Err(GradeError::Config(format!(
                    "component `{name}`: scaled_to must be non-negative, got {}",
                    component.scaled_to
                )));
            }
            for (kind, labels) in [("plot_qs", &component.plot_qs), ("manual_qs", &component.manual_qs)] {
                let unique: BTreeSet<&String> = labels.iter().collect();
                if unique.len() != labels.len() {
                    return Err(GradeError::Config(format!(
                        "component `{name}`: duplicate labels in {kind}"
                    )));
                }
            }
        }

        if self.max_overall() <= 0.0 {
            return Err(GradeError::Config(
                "components must scale to a positive total".to_string(),
            ));
        }

        Ok(())
    }

    pub fn component(&self, name: &str) -> Result<&ComponentConfig> {
        self.components.get(name).ok_or_else(|| {
            let known: Vec<&str> = self.components.keys().map(String::as_str).collect();
            GradeError::Config(format!(
                "unknown component `{name}`; configured: {}",
                known.join(", ")
            ))
        })
    }

    pub fn components_path(&self) -> PathBuf {
        self.components_path
            .clone()
            .unwrap_or_else(|| self.base_path.join("components"))
    }

    /// Directory holding the submission notebooks for one component.
    pub fn component_path(&self, name: &str) -> PathBuf {
        self.components_path().join(name)
    }

    /// Directory holding grading inputs and outputs for one component.
    pub fn marking_path(&self, name: &str) -> PathBuf {
        self.component_path(name).join("marking")
    }

    pub fn plot_notebook_path(&self, name: &str) -> PathBuf {
        self.component_path(name).join("generated").join("plot_nb.ipynb")
    }

    pub fn final_path(&self) -> PathBuf {
        self.base_path.join(&self.mark_fname)
    }

    pub fn max_overall(&self) -> f64 {
        self.components.values().map(|c| c.scaled_to).sum()
    }
}
