//! Per-component marks from autograder totals, markup marks, plot scores,
//! broken-submission overrides and manual reports.
//!
//! A student's mark is either
//!
//! * their autograder total plus markup marks plus plot scores (if the
//!   component has plot questions), or
//! * their `broken.csv` mark,
//!
//! plus the sum of their manual question scores. Nothing is written unless
//! every source agrees on the roster.

use std::collections::BTreeSet;
use std::path::PathBuf;

use tracing::{debug, info, instrument, warn};

use crate::config::{ComponentConfig, Config};
use crate::error::{ConsistencyError, GradeError, Result};
use crate::manual::{question_label, read_manual, REPORT_SUFFIX};
use crate::marks::{self, MARK_COL, TOTAL_COL};
use crate::models::{ComponentSources, ManualReport, ScoreMap};
use crate::notebook::{apply_markups, collect_markups, find_notebooks, login};
use crate::plots::{read_plot_scores, sum_plot_scores};

pub const AUTOGRADE_FILE: &str = "autograde.csv";
pub const BROKEN_FILE: &str = "broken.csv";
pub const COMPONENT_FILE: &str = "component.csv";

fn keys(scores: &ScoreMap) -> BTreeSet<&String> {
    scores.keys().collect()
}

fn owned(items: impl Iterator<Item = impl ToString>) -> Vec<String> {
    items.map(|s| s.to_string()).collect()
}

/// Checks the sources describe one roster and returns it, sorted.
pub fn check_parts(sources: &ComponentSources) -> Result<Vec<String>, ConsistencyError> {
    let autos = keys(&sources.autos);
    let broken = keys(&sources.broken);

    if !sources.plots.is_empty() {
        let plots = keys(&sources.plots);
        if autos != plots {
            return Err(ConsistencyError::PlotRoster {
                only_autos: owned(autos.difference(&plots)),
                only_plots: owned(plots.difference(&autos)),
            });
        }
    }

    let overlap = owned(autos.intersection(&broken));
    if !overlap.is_empty() {
        return Err(ConsistencyError::AutoBrokenOverlap { students: overlap });
    }

    let roster: BTreeSet<&String> = autos.union(&broken).copied().collect();
    for manual in &sources.manuals {
        let covered = keys(&manual.scores);
        if covered != roster {
            return Err(ConsistencyError::ManualRoster {
                question: manual.question.clone(),
                missing: owned(roster.difference(&covered)),
                unexpected: owned(covered.difference(&roster)),
            });
        }
    }

    Ok(owned(roster.into_iter()))
}

pub fn aggregate(sources: &ComponentSources) -> Result<ScoreMap, ConsistencyError> {
    let roster = check_parts(sources)?;
    let mut grades = ScoreMap::new();

    for student in roster {
        let manual_total: f64 = sources.manuals.iter().map(|m| m.scores[&student]).sum();
        let nb_mark = match sources.autos.get(&student) {
            Some(auto) => auto + sources.plots.get(&student).copied().unwrap_or(0.0),
            None => sources.broken[&student],
        };
        grades.insert(student, manual_total + nb_mark);
    }

    Ok(grades)
}

/// Autograder totals plus markup marks. Notebooks of students marked broken
/// are not opened; they may not even parse.
fn read_autos(config: &Config, name: &str, broken: &ScoreMap) -> Result<ScoreMap> {
    let path = config.marking_path(name).join(AUTOGRADE_FILE);
    if !path.is_file() {
        return Err(GradeError::MissingInput {
            path,
            hint: format!(
                "export the autograder totals (columns `{}`, `{TOTAL_COL}`) there first",
                config.student_id_col
            ),
        });
    }
    let mut autos = marks::read_scores(&path, &config.student_id_col, TOTAL_COL)?;

    let component_path = config.component_path(name);
    if component_path.is_dir() {
        let notebooks: Vec<PathBuf> = find_notebooks(&component_path, &config.notebook_exts, true)?
            .into_iter()
            .filter(|path| {
                let skip = broken.contains_key(&login(path));
                if skip {
                    debug!(notebook = %path.display(), "skipping broken submission");
                }
                !skip
            })
            .collect();
        let markups = collect_markups(&notebooks)?;
        debug!(students = markups.len(), "markup marks found");
        apply_markups(&mut autos, &markups)?;
    }

    Ok(autos)
}

fn read_plots(config: &Config, name: &str, component: &ComponentConfig) -> Result<ScoreMap> {
    let path = config.plot_notebook_path(name);
    if component.plot_qs.is_empty() {
        if path.is_file() {
            warn!(path = %path.display(), "ignoring plot notebook; component has no plot_qs");
        }
        return Ok(ScoreMap::new());
    }
    if !path.is_file() {
        return Err(GradeError::MissingInput {
            path,
            hint: format!("run `extract-plots {name}` and fill in the plot scores"),
        });
    }
    let records = read_plot_scores(&path)?;
    Ok(sum_plot_scores(&records, &component.plot_qs)?)
}

fn read_broken(config: &Config, name: &str) -> Result<ScoreMap> {
    let path = config.marking_path(name).join(BROKEN_FILE);
    marks::read_optional_scores(&path, &config.student_id_col, MARK_COL)
}

/// Reports on disk must be exactly the configured manual questions.
fn read_manuals(config: &Config, name: &str, component: &ComponentConfig) -> Result<Vec<ManualReport>> {
    let marking = config.marking_path(name);
    let pattern = format!(
        "{}/*{REPORT_SUFFIX}",
        glob::Pattern::escape(&marking.to_string_lossy())
    );
    let mut present = BTreeSet::new();
    for entry in glob::glob(&pattern)? {
        let path = entry.map_err(|err| GradeError::Io(err.into_error()))?;
        if let Some(label) = question_label(&path) {
            present.insert(label.to_string());
        }
    }

    let expected: BTreeSet<String> = component.manual_qs.iter().cloned().collect();
    let unexpected = owned(present.difference(&expected));
    if !unexpected.is_empty() {
        return Err(ConsistencyError::UnexpectedReports {
            questions: unexpected,
        }
        .into());
    }

    component
        .manual_qs
        .iter()
        .map(|question| {
            let path: PathBuf = marking.join(format!("{question}{REPORT_SUFFIX}"));
            if !path.is_file() {
                return Err(GradeError::MissingInput {
                    path,
                    hint: format!("run `extract-manual {name}` and fill in the scores"),
                });
            }
            read_manual(&path)
        })
        .collect()
}

pub fn load_sources(config: &Config, name: &str) -> Result<ComponentSources> {
    let component = config.component(name)?;
    let broken = read_broken(config, name)?;
    Ok(ComponentSources {
        autos: read_autos(config, name, &broken)?,
        plots: read_plots(config, name, component)?,
        broken,
        manuals: read_manuals(config, name, component)?,
    })
}

#[instrument(skip(config))]
pub fn grade_component(config: &Config, name: &str) -> Result<ScoreMap> {
    let sources = load_sources(config, name)?;
    debug!(
        autos = sources.autos.len(),
        plots = sources.plots.len(),
        broken = sources.broken.len(),
        manuals = sources.manuals.len(),
        "sources loaded"
    );
    let grades = aggregate(&sources)?;
    info!(students = grades.len(), "component graded");
    Ok(grades)
}

pub fn component_csv_path(config: &Config, name: &str) -> PathBuf {
    config.marking_path(name).join(COMPONENT_FILE)
}

pub fn write_component(config: &Config, name: &str, grades: &ScoreMap) -> Result<PathBuf> {
    let path = component_csv_path(config, name);
    marks::write_scores(&path, &config.student_id_col, grades)?;
    Ok(path)
}
