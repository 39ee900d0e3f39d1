use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{ConsistencyError, GradeError, Result};
use crate::marks::atomic_write;
use crate::models::ScoreMap;

static MARKUP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"#M:\s*([+-]?(?:\d+(?:\.\d*)?|\.\d+))").expect("markup regex")
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notebook {
    pub cells: Vec<Cell>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default = "default_nbformat")]
    pub nbformat: u32,
    #[serde(default = "default_nbformat_minor")]
    pub nbformat_minor: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    pub cell_type: String,
    #[serde(deserialize_with = "joined_source")]
    pub source: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Vec<Value>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_nbformat() -> u32 {
    4
}

fn default_nbformat_minor() -> u32 {
    4
}

/// nbformat allows `source` as one string or a list of line strings.
fn joined_source<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Source {
        Text(String),
        Lines(Vec<String>),
    }

    Ok(match Source::deserialize(deserializer)? {
        Source::Text(text) => text,
        Source::Lines(lines) => lines.concat(),
    })
}

impl Notebook {
    pub fn new(cells: Vec<Cell>) -> Self {
        Self {
            cells,
            metadata: Map::new(),
            nbformat: default_nbformat(),
            nbformat_minor: default_nbformat_minor(),
        }
    }

    pub fn markdown_cells(&self) -> impl Iterator<Item = &str> {
        self.cells
            .iter()
            .filter(|cell| cell.cell_type == "markdown")
            .map(|cell| cell.source.as_str())
    }

    /// Sum of `#M: <mark>` annotations anywhere in the notebook, if any.
    pub fn markup_total(&self) -> Option<f64> {
        let marks: Vec<f64> = self
            .cells
            .iter()
            .flat_map(|cell| cell.source.lines())
            .filter_map(|line| MARKUP.captures(line))
            .filter_map(|caps| caps.get(1)?.as_str().parse().ok())
            .collect();
        if marks.is_empty() {
            None
        } else {
            Some(marks.iter().sum())
        }
    }
}

impl Cell {
    pub fn markdown(source: impl Into<String>) -> Self {
        Self {
            cell_type: "markdown".to_string(),
            source: source.into(),
            metadata: Map::new(),
            outputs: None,
            extra: Map::new(),
        }
    }

    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    /// True for code cells whose stored outputs include an image.
    pub fn has_image_output(&self) -> bool {
        self.outputs.iter().flatten().any(|output| {
            output
                .get("data")
                .and_then(Value::as_object)
                .is_some_and(|data| data.keys().any(|mime| mime.starts_with("image/")))
        })
    }
}

/// Reads `.ipynb` as nbformat JSON; any other notebook format is kept as one
/// raw cell holding the whole file.
pub fn read_notebook(path: &Path) -> Result<Notebook> {
    let text = fs::read_to_string(path).map_err(GradeError::read(path))?;
    if has_extension(path, ".ipynb") {
        return serde_json::from_str(&text).map_err(|err| GradeError::InvalidRecord {
            path: path.to_path_buf(),
            reason: format!("not a valid notebook: {err}"),
        });
    }
    let mut cell = Cell::markdown(text);
    cell.cell_type = "raw".to_string();
    Ok(Notebook::new(vec![cell]))
}

pub fn write_notebook(path: &Path, notebook: &Notebook) -> Result<()> {
    let mut bytes = serde_json::to_vec_pretty(notebook)?;
    bytes.push(b'\n');
    atomic_write(path, &bytes)
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| format!(".{}", e.to_lowercase()) == ext.to_lowercase())
}

/// Notebooks directly inside `dir`, grouped by extension in `exts` order and
/// sorted by name within each group. With `first_only`, a file stem already
/// taken by a preferred extension is skipped.
pub fn find_notebooks(dir: &Path, exts: &[String], first_only: bool) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(GradeError::read(dir))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file())
        .collect();
    files.sort();

    let mut seen = BTreeSet::new();
    let mut notebooks = Vec::new();
    for ext in exts {
        for path in files.iter().filter(|p| has_extension(p, ext)) {
            let stem = login(path);
            if first_only && !seen.insert(stem) {
                continue;
            }
            notebooks.push(path.clone());
        }
    }

    debug!(dir = %dir.display(), count = notebooks.len(), "found notebooks");
    Ok(notebooks)
}

/// Submission notebooks are named for the student's login.
pub fn login(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Markup marks per student, keyed by notebook login. Notebooks without any
/// `#M:` line contribute nothing.
pub fn collect_markups(paths: &[PathBuf]) -> Result<ScoreMap> {
    let mut markups = ScoreMap::new();
    for path in paths {
        if let Some(total) = read_notebook(path)?.markup_total() {
            debug!(notebook = %path.display(), total, "markup marks");
            markups.insert(login(path), total);
        }
    }
    Ok(markups)
}

/// Adds markup marks onto autograder totals. Every marked-up student must
/// already have a total.
pub fn apply_markups(autos: &mut ScoreMap, markups: &ScoreMap) -> Result<()> {
    let orphans: Vec<String> = markups
        .keys()
        .filter(|login| !autos.contains_key(*login))
        .cloned()
        .collect();
    if !orphans.is_empty() {
        return Err(ConsistencyError::MarkupWithoutAuto { students: orphans }.into());
    }
    for (login, mark) in markups {
        if let Some(total) = autos.get_mut(login) {
            *total += mark;
        }
    }
    Ok(())
}
