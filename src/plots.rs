//! Plot marks entered into the generated plot notebook.
//!
//! The notebook alternates `## <login>` heading cells with that student's
//! plots, each student's run closed by a markdown cell of the form:
//!
//! ```text
//! Plot scores:
//! * complaints_pp : 1
//! * complaints_pc : 0.5
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{ConsistencyError, GradeError, ParseError, Result};
use crate::manual::heading;
use crate::models::{PlotScoreRecord, ScoreMap};
use crate::notebook::{read_notebook, Cell, Notebook};

pub const PLOT_MARKER: &str = "Plot scores:";

static BULLET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\*\s+(\w+)\s*:\s*([+-]?(?:\d+(?:\.\d*)?|\.\d+))\s*$").expect("bullet regex")
});

/// Score bullets from a `Plot scores:` block in the order written, or `None`
/// if `text` is not one. Stops at the first line that is not a score bullet.
pub fn match_plot_scores(text: &str) -> Option<Vec<(String, f64)>> {
    let mut lines = text.trim().lines();
    if lines.next()?.trim() != PLOT_MARKER {
        return None;
    }

    let mut scores = Vec::new();
    for line in lines {
        let Some(caps) = BULLET.captures(line.trim_end()) else {
            break;
        };
        let Ok(value) = caps[2].parse::<f64>() else {
            break;
        };
        scores.push((caps[1].to_string(), value));
    }
    Some(scores)
}

fn into_record(name: &str, scores: Vec<(String, f64)>) -> Result<PlotScoreRecord, ParseError> {
    let mut record = PlotScoreRecord::new();
    for (label, value) in scores {
        if record.contains_key(&label) {
            return Err(ParseError::RepeatedPlotLabel {
                name: name.to_string(),
                label,
            });
        }
        record.insert(label, value);
    }
    Ok(record)
}

/// A heading cell starts with `## <login>`; anything after that line is
/// commentary.
fn cell_heading(text: &str) -> Option<&str> {
    heading(text.trim_start().lines().next()?)
}

#[derive(Debug, Clone, PartialEq)]
pub enum State {
    Before,
    FindScores { name: String },
}

/// One markdown cell through the name-then-scores machine.
pub fn step(
    state: State,
    cell_no: usize,
    text: &str,
) -> Result<(State, Option<(String, PlotScoreRecord)>), ParseError> {
    match state {
        State::Before => {
            if let Some(name) = cell_heading(text) {
                Ok((
                    State::FindScores {
                        name: name.to_string(),
                    },
                    None,
                ))
            } else if match_plot_scores(text).is_some() {
                Err(ParseError::PlotScoresWithoutHeading { cell: cell_no })
            } else {
                Ok((State::Before, None))
            }
        }
        State::FindScores { name } => {
            if let Some(scores) = match_plot_scores(text) {
                let record = into_record(&name, scores)?;
                Ok((State::Before, Some((name, record))))
            } else if cell_heading(text).is_some() {
                Err(ParseError::MissingPlotScores { name })
            } else {
                Ok((State::FindScores { name }, None))
            }
        }
    }
}

pub fn parse_plot_cells<'a>(
    cells: impl IntoIterator<Item = &'a str>,
) -> Result<BTreeMap<String, PlotScoreRecord>, ParseError> {
    let mut state = State::Before;
    let mut records = BTreeMap::new();

    for (idx, text) in cells.into_iter().enumerate() {
        let (next, emitted) = step(state, idx + 1, text)?;
        if let Some((name, record)) = emitted {
            if records.insert(name.clone(), record).is_some() {
                return Err(ParseError::DuplicatePlotSection {
                    name,
                    cell: idx + 1,
                });
            }
        }
        state = next;
    }

    match state {
        State::Before => Ok(records),
        State::FindScores { name } => Err(ParseError::MissingPlotScores { name }),
    }
}

pub fn read_plot_scores(path: &Path) -> Result<BTreeMap<String, PlotScoreRecord>> {
    let notebook = read_notebook(path)?;
    parse_plot_cells(notebook.markdown_cells()).map_err(|source| GradeError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Total plot mark per student, after checking each record carries exactly
/// the configured questions.
pub fn sum_plot_scores(
    records: &BTreeMap<String, PlotScoreRecord>,
    plot_qs: &[String],
) -> Result<ScoreMap, ConsistencyError> {
    let expected: BTreeSet<&String> = plot_qs.iter().collect();
    let mut sums = ScoreMap::new();

    for (student, record) in records {
        let actual: BTreeSet<&String> = record.keys().collect();
        if actual != expected {
            return Err(ConsistencyError::PlotLabels {
                student: student.clone(),
                missing: expected.difference(&actual).map(|s| s.to_string()).collect(),
                unexpected: actual.difference(&expected).map(|s| s.to_string()).collect(),
            });
        }
        sums.insert(student.clone(), record.values().sum());
    }

    Ok(sums)
}

pub fn score_template(plot_qs: &[String]) -> String {
    std::iter::once(PLOT_MARKER.to_string())
        .chain(plot_qs.iter().map(|q| format!("* {q} : ")))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Code cells carrying stored image output, ready to copy into another
/// notebook.
pub fn plot_cells(notebook: &Notebook) -> Vec<Cell> {
    notebook
        .cells
        .iter()
        .filter(|cell| cell.has_image_output())
        .cloned()
        .map(|mut cell| {
            cell.extra.remove("id");
            cell
        })
        .collect()
}

/// One section per student: heading, plots, blank score block.
pub fn build_plot_notebook(plots: &BTreeMap<String, Vec<Cell>>, plot_qs: &[String]) -> Notebook {
    let template = score_template(plot_qs);
    let mut cells = Vec::new();
    for (login, student_cells) in plots {
        cells.push(Cell::markdown(format!("## {login}")));
        cells.extend(student_cells.iter().cloned());
        cells.push(Cell::markdown(template.clone()));
    }
    Notebook::new(cells)
}
