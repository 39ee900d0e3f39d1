use std::fmt::Write;

use chrono::NaiveDate;

use crate::marks::{PERCENT_COL, TOTAL_COL};
use crate::models::{ColumnSummary, FinalRow, FinalTable};

fn describe(name: &str, values: &[f64]) -> ColumnSummary {
    let count = values.len();
    if count == 0 {
        return ColumnSummary {
            name: name.to_string(),
            count,
            mean: 0.0,
            std: 0.0,
            min: 0.0,
            median: 0.0,
            max: 0.0,
        };
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mean = sorted.iter().sum::<f64>() / count as f64;
    let std = if count < 2 {
        0.0
    } else {
        let ss: f64 = sorted.iter().map(|v| (v - mean).powi(2)).sum();
        (ss / (count - 1) as f64).sqrt()
    };
    let median = if count % 2 == 1 {
        sorted[count / 2]
    } else {
        (sorted[count / 2 - 1] + sorted[count / 2]) / 2.0
    };

    ColumnSummary {
        name: name.to_string(),
        count,
        mean,
        std,
        min: sorted[0],
        median,
        max: sorted[count - 1],
    }
}

/// One summary per final-table column: each component, then percent, then
/// total.
pub fn summarize(table: &FinalTable) -> Vec<ColumnSummary> {
    let mut summaries: Vec<ColumnSummary> = table
        .components
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            let values: Vec<f64> = table.rows.iter().map(|row| row.scaled[idx]).collect();
            describe(name, &values)
        })
        .collect();

    let percents: Vec<f64> = table.rows.iter().map(|row| row.percent).collect();
    summaries.push(describe(PERCENT_COL, &percents));
    let totals: Vec<f64> = table.rows.iter().map(|row| row.total).collect();
    summaries.push(describe(TOTAL_COL, &totals));
    summaries
}

/// Plain-text table for the terminal.
pub fn format_summary(summaries: &[ColumnSummary]) -> String {
    let width = summaries
        .iter()
        .map(|s| s.name.len())
        .max()
        .unwrap_or(0)
        .max(6);

    let mut output = String::new();
    let _ = writeln!(
        output,
        "{:<width$} {:>6} {:>8} {:>8} {:>8} {:>8} {:>8}",
        "column", "count", "mean", "std", "min", "median", "max"
    );
    for s in summaries {
        let _ = writeln!(
            output,
            "{:<width$} {:>6} {:>8.2} {:>8.2} {:>8.2} {:>8.2} {:>8.2}",
            s.name, s.count, s.mean, s.std, s.min, s.median, s.max
        );
    }
    output
}

fn lowest(table: &FinalTable, limit: usize) -> Vec<&FinalRow> {
    let mut rows: Vec<&FinalRow> = table.rows.iter().collect();
    rows.sort_by(|a, b| a.total.total_cmp(&b.total).then_with(|| a.student.cmp(&b.student)));
    rows.truncate(limit);
    rows
}

pub fn build_report(table: &FinalTable, generated: NaiveDate, limit: usize) -> String {
    let summaries = summarize(table);
    let mut output = String::new();

    let _ = writeln!(output, "# Final Grades Report");
    let _ = writeln!(
        output,
        "Generated {} for {} students across {} components",
        generated,
        table.rows.len(),
        table.components.len()
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Summary");

    if table.rows.is_empty() {
        let _ = writeln!(output, "No students graded.");
        return output;
    }

    let _ = writeln!(output, "| Column | Count | Mean | Std | Min | Median | Max |");
    let _ = writeln!(output, "|---|---|---|---|---|---|---|");
    for s in &summaries {
        let _ = writeln!(
            output,
            "| {} | {} | {:.2} | {:.2} | {:.2} | {:.2} | {:.2} |",
            s.name, s.count, s.mean, s.std, s.min, s.median, s.max
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Lowest Totals");
    for row in lowest(table, limit) {
        let parts: Vec<String> = table
            .components
            .iter()
            .zip(&row.scaled)
            .map(|(name, mark)| format!("{name} {mark:.2}"))
            .collect();
        let _ = writeln!(
            output,
            "- {}: {:.2} ({:.1}%); {}",
            row.student,
            row.total,
            row.percent,
            parts.join(", ")
        );
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn row(student: &str, scaled: &[f64]) -> FinalRow {
        let total: f64 = scaled.iter().sum();
        FinalRow {
            student: student.to_string(),
            scaled: scaled.to_vec(),
            percent: total,
            total,
        }
    }

    fn table() -> FinalTable {
        FinalTable {
            components: vec!["plots".to_string(), "spouses".to_string()],
            rows: vec![
                row("amy", &[20.0, 30.0]),
                row("bo", &[10.0, 40.0]),
                row("cy", &[40.0, 50.0]),
                row("di", &[0.0, 20.0]),
            ],
        }
    }

    #[test]
    fn describes_columns() {
        let summaries = summarize(&table());
        let names: Vec<&str> = summaries.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["plots", "spouses", "Percent", "Total"]);

        let plots = &summaries[0];
        assert_eq!(plots.count, 4);
        assert_eq!(plots.mean, 17.5);
        assert_eq!(plots.min, 0.0);
        assert_eq!(plots.median, 15.0);
        assert_eq!(plots.max, 40.0);
        assert!((plots.std - 17.078251).abs() < 1e-5);
    }

    #[test]
    fn single_value_has_zero_spread() {
        let summary = describe("x", &[3.0]);
        assert_eq!(summary.std, 0.0);
        assert_eq!(summary.median, 3.0);
    }

    #[test]
    fn report_lists_lowest_totals_first() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 15).unwrap();
        let report = build_report(&table(), date, 2);
        assert!(report.starts_with("# Final Grades Report\nGenerated 2026-10-15 for 4 students"));
        assert!(report.contains("| Total | 4 | 52.50 |"));

        let lowest = report.split("## Lowest Totals\n").nth(1).unwrap();
        let lines: Vec<&str> = lowest.lines().collect();
        assert_eq!(
            lines,
            vec![
                "- di: 20.00 (20.0%); plots 0.00, spouses 20.00",
                "- amy: 50.00 (50.0%); plots 20.00, spouses 30.00",
            ]
        );
    }

    #[test]
    fn empty_table_report() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 15).unwrap();
        let empty = FinalTable {
            components: vec!["plots".to_string()],
            rows: vec![],
        };
        assert!(build_report(&empty, date, 5).ends_with("No students graded.\n"));
    }

    #[test]
    fn summary_text_has_header_and_rows() {
        let text = format_summary(&summarize(&table()));
        assert_eq!(text.lines().count(), 5);
        assert!(text.starts_with("column"));
    }
}
