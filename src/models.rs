use std::collections::BTreeMap;

/// Student login to mark. Ordered so every table we write is reproducible.
pub type ScoreMap = BTreeMap<String, f64>;

/// Plot question label to score, for one student.
pub type PlotScoreRecord = BTreeMap<String, f64>;

#[derive(Debug, Clone, PartialEq)]
pub struct ManualReport {
    pub question: String,
    pub scores: ScoreMap,
}

/// The four score sources for one component, as read from disk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComponentSources {
    pub autos: ScoreMap,
    pub plots: ScoreMap,
    pub broken: ScoreMap,
    pub manuals: Vec<ManualReport>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FinalRow {
    pub student: String,
    /// Rescaled component marks, in `FinalTable::components` order.
    pub scaled: Vec<f64>,
    pub percent: f64,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FinalTable {
    pub components: Vec<String>,
    pub rows: Vec<FinalRow>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSummary {
    pub name: String,
    pub count: usize,
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub median: f64,
    pub max: f64,
}
