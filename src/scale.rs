use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, instrument};

use crate::aggregate::component_csv_path;
use crate::config::Config;
use crate::error::{ConsistencyError, GradeError, Result};
use crate::marks::{self, MARK_COL};
use crate::models::{FinalRow, FinalTable, ScoreMap};

pub fn read_component(config: &Config, name: &str) -> Result<ScoreMap> {
    let path = component_csv_path(config, name);
    if !path.is_file() {
        return Err(GradeError::MissingInput {
            path,
            hint: format!("run `grade-component {name}` first"),
        });
    }
    marks::read_scores(&path, &config.student_id_col, MARK_COL)
}

/// Rescales each component to its `scaled_to` and sums per student. Every
/// component must cover the same students.
pub fn combine(
    config: &Config,
    marks: &BTreeMap<String, ScoreMap>,
) -> Result<FinalTable, ConsistencyError> {
    let names: Vec<String> = config.components.keys().cloned().collect();

    let reference: BTreeSet<&String> = names
        .first()
        .and_then(|name| marks.get(name))
        .map(|scores| scores.keys().collect())
        .unwrap_or_default();
    for name in &names {
        let covered: BTreeSet<&String> = marks
            .get(name)
            .map(|scores| scores.keys().collect())
            .unwrap_or_default();
        if covered != reference {
            return Err(ConsistencyError::ComponentRoster {
                component: name.clone(),
                missing: reference.difference(&covered).map(|s| s.to_string()).collect(),
                unexpected: covered.difference(&reference).map(|s| s.to_string()).collect(),
            });
        }
    }

    let max_overall = config.max_overall();
    let mut rows = Vec::with_capacity(reference.len());
    for student in reference {
        let scaled: Vec<f64> = config
            .components
            .iter()
            .map(|(name, component)| {
                marks[name][student] * component.scaled_to / component.actual_max
            })
            .collect();
        let mut total: f64 = scaled.iter().sum();
        if config.round_final {
            total = total.round_ties_even();
        }
        rows.push(FinalRow {
            student: student.clone(),
            scaled,
            percent: total / max_overall * 100.0,
            total,
        });
    }

    Ok(FinalTable {
        components: names,
        rows,
    })
}

#[instrument(skip(config))]
pub fn scale_combine(config: &Config) -> Result<FinalTable> {
    let mut marks = BTreeMap::new();
    for name in config.components.keys() {
        let scores = read_component(config, name)?;
        debug!(component = %name, students = scores.len(), "read component marks");
        marks.insert(name.clone(), scores);
    }
    Ok(combine(config, &marks)?)
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::aggregate::write_component;
    use crate::config::parse_config;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    const CONFIG: &str = "\
base_path: /course
components:
  spouses:
    scaled_to: 60
    actual_max: 60
  plots:
    scaled_to: 40
    actual_max: 50
";

    fn config(text: &str) -> Config {
        parse_config(text, Path::new("/course")).unwrap()
    }

    fn scores(pairs: &[(&str, f64)]) -> ScoreMap {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn marks(spouses: &[(&str, f64)], plots: &[(&str, f64)]) -> BTreeMap<String, ScoreMap> {
        [
            ("spouses".to_string(), scores(spouses)),
            ("plots".to_string(), scores(plots)),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn rescales_and_sums() {
        let table = combine(&config(CONFIG), &marks(&[("amy", 30.0)], &[("amy", 25.0)])).unwrap();
        assert_eq!(table.components, vec!["plots", "spouses"]);
        assert_eq!(
            table.rows,
            vec![FinalRow {
                student: "amy".to_string(),
                scaled: vec![20.0, 30.0],
                percent: 50.0,
                total: 50.0,
            }]
        );
    }

    #[test]
    fn rounding_applies_to_total_and_percent() {
        let rounded = format!("{CONFIG}round_final: true\n");
        let input = marks(&[("amy", 30.7)], &[("amy", 25.0)]);

        let table = combine(&config(&rounded), &input).unwrap();
        assert_eq!(table.rows[0].total, 51.0);
        assert!((table.rows[0].percent - 51.0).abs() < 1e-9);
        assert!((table.rows[0].scaled[1] - 30.7).abs() < 1e-9);

        let table = combine(&config(CONFIG), &input).unwrap();
        assert!((table.rows[0].total - 50.7).abs() < 1e-9);
    }

    #[test]
    fn rounds_half_to_even() {
        let rounded = format!("{CONFIG}round_final: true\n");
        let table = combine(&config(&rounded), &marks(&[("amy", 30.5)], &[("amy", 0.0)])).unwrap();
        assert_eq!(table.rows[0].total, 30.0);
    }

    #[test]
    fn rosters_must_agree() {
        let err = combine(
            &config(CONFIG),
            &marks(&[("amy", 30.0), ("bo", 10.0)], &[("amy", 25.0)]),
        )
        .unwrap_err();
        assert_eq!(
            err,
            ConsistencyError::ComponentRoster {
                component: "spouses".to_string(),
                missing: vec![],
                unexpected: vec!["bo".to_string()],
            }
        );
    }

    #[test]
    fn missing_component_file_says_what_to_run() {
        let dir = TempDir::new().unwrap();
        let text = CONFIG.replace("/course", &dir.path().display().to_string());
        let config = parse_config(&text, dir.path()).unwrap();
        write_component(&config, "plots", &scores(&[("amy", 25.0)])).unwrap();

        let err = scale_combine(&config).unwrap_err();
        assert!(matches!(err, GradeError::MissingInput { .. }));
        assert!(err.to_string().contains("run `grade-component spouses` first"));

        write_component(&config, "spouses", &scores(&[("amy", 30.0)])).unwrap();
        let table = scale_combine(&config).unwrap();
        assert_eq!(table.rows[0].total, 50.0);
    }
}
