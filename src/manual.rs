//! Scores typed by markers into `<question>_report.md` files.
//!
//! A report is a run of sections, each a `## <login>` heading followed (after
//! any amount of answer text) by exactly one `MCPScore : <number>` line.

use std::fmt::Write;
use std::fs;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{GradeError, ParseError, Result};
use crate::models::{ManualReport, ScoreMap};

pub const REPORT_SUFFIX: &str = "_report.md";

static HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^##\s+(\w+)\s*$").expect("heading regex"));

static SCORE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*MCPScore\s*:\s*([+-]?(?:\d+(?:\.\d*)?|\.\d+)(?:[eE][+-]?\d+)?)\s*$")
        .expect("score regex")
});

#[derive(Debug, Clone, PartialEq)]
pub enum State {
    /// Looking for the next heading.
    Before,
    /// Heading seen at `line`, waiting for its score.
    FindScore { name: String, line: usize },
}

/// Line classification shared with the plot notebook parser.
pub(crate) fn heading(line: &str) -> Option<&str> {
    HEADING
        .captures(line)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Whether `login` survives being written as a `## <login>` heading and read
/// back.
pub fn is_heading_login(login: &str) -> bool {
    heading(&format!("## {login}")) == Some(login)
}

fn score(line: &str) -> Option<f64> {
    SCORE
        .captures(line)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Advance the state machine by one line, returning the next state and any
/// completed `(name, score)` entry.
pub fn step(
    state: State,
    line_no: usize,
    line: &str,
) -> Result<(State, Option<(String, f64)>), ParseError> {
    match state {
        State::Before => {
            if let Some(name) = heading(line) {
                let next = State::FindScore {
                    name: name.to_string(),
                    line: line_no,
                };
                Ok((next, None))
            } else if score(line).is_some() {
                Err(ParseError::MultipleScores {
                    line_no,
                    line: line.to_string(),
                })
            } else {
                Ok((State::Before, None))
            }
        }
        State::FindScore { name, line: start } => {
            if let Some(value) = score(line) {
                Ok((State::Before, Some((name, value))))
            } else if heading(line).is_some() {
                Err(ParseError::MissingScore {
                    name,
                    line: line_no,
                })
            } else {
                Ok((State::FindScore { name, line: start }, None))
            }
        }
    }
}

/// End of input is only legal between sections.
pub fn finish(state: State, last_line: usize) -> Result<(), ParseError> {
    match state {
        State::Before => Ok(()),
        State::FindScore { name, .. } => Err(ParseError::MissingScore {
            name,
            line: last_line,
        }),
    }
}

pub fn parse_manual_scores(text: &str) -> Result<ScoreMap, ParseError> {
    let mut state = State::Before;
    let mut scores = ScoreMap::new();
    let mut last_line = 0;

    for (idx, line) in text.lines().enumerate() {
        last_line = idx + 1;
        let (next, emitted) = step(state, last_line, line)?;
        if let Some((name, value)) = emitted {
            if scores.insert(name.clone(), value).is_some() {
                return Err(ParseError::DuplicateHeading {
                    name,
                    line: last_line,
                });
            }
        }
        state = next;
    }

    finish(state, last_line)?;
    Ok(scores)
}

/// Question label for a report file name, e.g. `cheese_report.md` -> `cheese`.
pub fn question_label(path: &Path) -> Option<&str> {
    path.file_name()?.to_str()?.strip_suffix(REPORT_SUFFIX)
}

pub fn read_manual(path: &Path) -> Result<ManualReport> {
    let question = question_label(path)
        .ok_or_else(|| GradeError::InvalidRecord {
            path: path.to_path_buf(),
            reason: format!("report file names must end in {REPORT_SUFFIX}"),
        })?
        .to_string();
    let text = fs::read_to_string(path).map_err(GradeError::read(path))?;
    let scores = parse_manual_scores(&text).map_err(|source| GradeError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::debug!(%question, students = scores.len(), "parsed manual report");
    Ok(ManualReport { question, scores })
}

/// Blank report for markers to fill in, one section per student answer.
pub fn render_report<'a>(
    question: &str,
    answers: impl IntoIterator<Item = (&'a String, &'a String)>,
) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "# Answers for {question}");
    for (login, answer) in answers {
        let _ = writeln!(output);
        let _ = writeln!(output, "## {login}");
        let _ = writeln!(output);
        let _ = writeln!(output, "{}", answer.trim_end());
        let _ = writeln!(output);
        let _ = writeln!(output, "MCPScore:");
    }
    output
}
