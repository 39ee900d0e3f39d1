use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = GradeError> = std::result::Result<T, E>;

/// Malformed score block in a markdown report or plot notebook.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("no MCPScore line for `{name}` (section ended at line {line})")]
    MissingScore { name: String, line: usize },

    #[error("score at line {line_no} has no heading of its own: {line:?}")]
    MultipleScores { line_no: usize, line: String },

    #[error("second section for `{name}` at line {line}")]
    DuplicateHeading { name: String, line: usize },

    #[error("no `Plot scores:` block for `{name}`")]
    MissingPlotScores { name: String },

    #[error("`Plot scores:` block in markdown cell {cell} has no student heading before it")]
    PlotScoresWithoutHeading { cell: usize },

    #[error("second plot section for `{name}` at markdown cell {cell}")]
    DuplicatePlotSection { name: String, cell: usize },

    #[error("plot question `{label}` scored twice for `{name}`")]
    RepeatedPlotLabel { name: String, label: String },
}

/// The score sources for a component (or the components of an assignment)
/// disagree about which students exist.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConsistencyError {
    #[error(
        "plot scores and autograder totals cover different students; \
         autograded without plot scores: {}; plot scores without autograde: {}",
        list(.only_autos),
        list(.only_plots)
    )]
    PlotRoster {
        only_autos: Vec<String>,
        only_plots: Vec<String>,
    },

    #[error("students both autograded and marked broken: {}", list(.students))]
    AutoBrokenOverlap { students: Vec<String> },

    #[error(
        "manual question `{question}` does not cover the roster; \
         missing: {}; not in roster: {}",
        list(.missing),
        list(.unexpected)
    )]
    ManualRoster {
        question: String,
        missing: Vec<String>,
        unexpected: Vec<String>,
    },

    #[error(
        "plot scores for `{student}` do not match configured plot questions; \
         missing: {}; unexpected: {}",
        list(.missing),
        list(.unexpected)
    )]
    PlotLabels {
        student: String,
        missing: Vec<String>,
        unexpected: Vec<String>,
    },

    #[error("markup marks for students with no autograder total: {}", list(.students))]
    MarkupWithoutAuto { students: Vec<String> },

    #[error("manual reports for unconfigured questions: {}", list(.questions))]
    UnexpectedReports { questions: Vec<String> },

    #[error(
        "component `{component}` covers a different roster; \
         missing: {}; not in other components: {}",
        list(.missing),
        list(.unexpected)
    )]
    ComponentRoster {
        component: String,
        missing: Vec<String>,
        unexpected: Vec<String>,
    },
}

#[derive(Debug, Error)]
pub enum GradeError {
    #[error("could not parse scores in {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: ParseError,
    },

    #[error(transparent)]
    Consistency(#[from] ConsistencyError),

    #[error("missing {}; {hint}", path.display())]
    MissingInput { path: PathBuf, hint: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("bad record in {}: {reason}", path.display())]
    InvalidRecord { path: PathBuf, reason: String },

    #[error("{}", .0.join("\n"))]
    Notebooks(Vec<String>),

    #[error("failed to read {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Pattern(#[from] glob::PatternError),
}

impl GradeError {
    pub fn read(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| GradeError::Read { path, source }
    }
}

fn list(items: &[String]) -> String {
    if items.is_empty() {
        "none".to_string()
    } else {
        items.join(", ")
    }
}
