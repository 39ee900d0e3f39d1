//! Builds the files markers fill in: one markdown report per manual question
//! and one notebook of everyone's plots.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::config::Config;
use crate::error::{GradeError, Result};
use crate::manual::{is_heading_login, render_report, REPORT_SUFFIX};
use crate::marks::atomic_write;
use crate::notebook::{find_notebooks, login, read_notebook, write_notebook, Notebook};
use crate::plots::{build_plot_notebook, plot_cells};

/// Metadata key marking a cell as the answer to a manual question.
pub const PROBLEM_ID_KEY: &str = "manual_problem_id";

/// Answer text per question label. Each label must appear exactly once.
pub fn extract_answers(
    notebook: &Notebook,
    labels: &[String],
) -> Result<BTreeMap<String, String>, String> {
    let mut answers = BTreeMap::new();
    for cell in &notebook.cells {
        let Some(id) = cell.metadata_str(PROBLEM_ID_KEY) else {
            continue;
        };
        if !labels.iter().any(|label| label == id) {
            continue;
        }
        if answers.insert(id.to_string(), cell.source.clone()).is_some() {
            return Err(format!("more than one cell for {id}"));
        }
    }

    let missing: Vec<&str> = labels
        .iter()
        .filter(|label| !answers.contains_key(*label))
        .map(String::as_str)
        .collect();
    if !missing.is_empty() {
        return Err(format!("no metadata for {}", missing.join(", ")));
    }
    Ok(answers)
}

/// Answers for every notebook, keyed by login. Problems in any notebook are
/// gathered and reported together.
pub fn collect_answers(
    paths: &[PathBuf],
    labels: &[String],
) -> Result<BTreeMap<String, BTreeMap<String, String>>> {
    let mut all = BTreeMap::new();
    let mut errors = Vec::new();

    for path in paths {
        if let Err(reason) = check_login(path) {
            errors.push(reason);
            continue;
        }
        let notebook = read_notebook(path)?;
        match extract_answers(&notebook, labels) {
            Ok(answers) => {
                all.insert(login(path), answers);
            }
            Err(reason) => errors.push(format!("{}: {reason}", path.display())),
        }
    }

    if !errors.is_empty() {
        return Err(GradeError::Notebooks(errors));
    }
    Ok(all)
}

/// Logins become `## <login>` headings in the files markers fill in, so they
/// must read back as headings.
fn check_login(path: &Path) -> std::result::Result<(), String> {
    let name = login(path);
    if is_heading_login(&name) {
        Ok(())
    } else {
        Err(format!(
            "{}: login `{name}` is not usable as a heading; use letters, digits and `_` only",
            path.display()
        ))
    }
}

fn submissions(config: &Config, name: &str) -> Result<Vec<PathBuf>> {
    let dir = config.component_path(name);
    let notebooks = if dir.is_dir() {
        find_notebooks(&dir, &config.notebook_exts, true)?
    } else {
        Vec::new()
    };
    if notebooks.is_empty() {
        return Err(GradeError::MissingInput {
            path: dir,
            hint: format!(
                "no notebooks with extensions {}; unpack the submissions first",
                config.notebook_exts.join(", ")
            ),
        });
    }
    Ok(notebooks)
}

fn refuse_overwrite(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        return Err(GradeError::Config(format!(
            "{} already exists; pass --force to replace it",
            path.display()
        )));
    }
    Ok(())
}

pub fn extract_manual(config: &Config, name: &str, force: bool) -> Result<Vec<PathBuf>> {
    let component = config.component(name)?;
    if component.manual_qs.is_empty() {
        return Err(GradeError::Config(format!(
            "component `{name}` has no manual_qs"
        )));
    }

    let marking = config.marking_path(name);
    let targets: Vec<PathBuf> = component
        .manual_qs
        .iter()
        .map(|q| marking.join(format!("{q}{REPORT_SUFFIX}")))
        .collect();
    for target in &targets {
        refuse_overwrite(target, force)?;
    }

    let answers = collect_answers(&submissions(config, name)?, &component.manual_qs)?;
    for (question, target) in component.manual_qs.iter().zip(&targets) {
        let per_student = answers
            .iter()
            .filter_map(|(login, by_label)| by_label.get(question).map(|a| (login, a)));
        atomic_write(target, render_report(question, per_student).as_bytes())?;
        info!(path = %target.display(), "wrote manual report");
    }

    Ok(targets)
}

pub fn extract_plots(config: &Config, name: &str, force: bool) -> Result<PathBuf> {
    let component = config.component(name)?;
    if component.plot_qs.is_empty() {
        return Err(GradeError::Config(format!("component `{name}` has no plot_qs")));
    }
    let target = config.plot_notebook_path(name);
    refuse_overwrite(&target, force)?;

    let notebooks = submissions(config, name)?;
    let errors: Vec<String> = notebooks
        .iter()
        .filter_map(|path| check_login(path).err())
        .collect();
    if !errors.is_empty() {
        return Err(GradeError::Notebooks(errors));
    }

    let mut plots = BTreeMap::new();
    for path in notebooks {
        let cells = plot_cells(&read_notebook(&path)?);
        if cells.is_empty() {
            warn!(notebook = %path.display(), "no stored plot output");
        }
        plots.insert(login(&path), cells);
    }

    write_notebook(&target, &build_plot_notebook(&plots, &component.plot_qs))?;
    info!(path = %target.display(), students = plots.len(), "wrote plot notebook");
    Ok(target)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::config::parse_config;
    use crate::manual::read_manual;
    use crate::notebook::Cell;
    use crate::plots::read_plot_scores;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::TempDir;

    fn answer_cell(label: &str, text: &str) -> Cell {
        let mut cell = Cell::markdown(text);
        cell.metadata.insert(PROBLEM_ID_KEY.to_string(), json!(label));
        cell
    }

    fn plot_cell() -> Cell {
        serde_json::from_value(json!({
            "cell_type": "code", "id": "abc123", "metadata": {}, "source": "plt.plot(x)",
            "execution_count": 3,
            "outputs": [{"output_type": "display_data", "metadata": {},
                         "data": {"image/png": "iVBOR"}}]
        }))
        .unwrap()
    }

    fn labels(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn answers_by_label() {
        let nb = Notebook::new(vec![
            answer_cell("cheese", "Cheddar"),
            Cell::markdown("unrelated"),
            answer_cell("other", "ignored"),
        ]);
        let answers = extract_answers(&nb, &labels(&["cheese"])).unwrap();
        assert_eq!(answers["cheese"], "Cheddar");
        assert_eq!(answers.len(), 1);
    }

    #[test]
    fn missing_or_repeated_labels() {
        let nb = Notebook::new(vec![answer_cell("cheese", "Cheddar")]);
        let err = extract_answers(&nb, &labels(&["cheese", "wine"])).unwrap_err();
        assert_eq!(err, "no metadata for wine");

        let nb = Notebook::new(vec![answer_cell("cheese", "a"), answer_cell("cheese", "b")]);
        let err = extract_answers(&nb, &labels(&["cheese"])).unwrap_err();
        assert_eq!(err, "more than one cell for cheese");
    }

    fn setup() -> (TempDir, Config) {
        let dir = TempDir::new().unwrap();
        let text = format!(
            "base_path: {}\ncomponents:\n  spouses:\n    scaled_to: 10\n    actual_max: 10\n    \
             plot_qs: [pp]\n    manual_qs: [cheese]\n",
            dir.path().display()
        );
        let config = parse_config(&text, dir.path()).unwrap();
        let nb_dir = config.component_path("spouses");
        fs::create_dir_all(&nb_dir).unwrap();
        for login in ["amy", "bo"] {
            let nb = Notebook::new(vec![
                answer_cell("cheese", &format!("{login} likes brie")),
                plot_cell(),
            ]);
            write_notebook(&nb_dir.join(format!("{login}.ipynb")), &nb).unwrap();
        }
        (dir, config)
    }

    #[test]
    fn writes_one_report_per_question() {
        let (_dir, config) = setup();
        let written = extract_manual(&config, "spouses", false).unwrap();
        assert_eq!(written.len(), 1);

        let text = fs::read_to_string(&written[0]).unwrap();
        assert!(text.contains("## amy\n\namy likes brie\n\nMCPScore:\n"));
        assert!(text.contains("## bo\n\nbo likes brie\n\nMCPScore:\n"));

        // Unfilled reports don't parse.
        assert!(read_manual(&written[0]).is_err());

        let err = extract_manual(&config, "spouses", false).unwrap_err();
        assert!(err.to_string().contains("--force"));
        assert!(extract_manual(&config, "spouses", true).is_ok());
    }

    #[test]
    fn collects_notebook_problems() {
        let (_dir, config) = setup();
        let nb = Notebook::new(vec![Cell::markdown("no answers here")]);
        write_notebook(&config.component_path("spouses").join("cy.ipynb"), &nb).unwrap();
        let err = extract_manual(&config, "spouses", false).unwrap_err();
        assert!(matches!(err, GradeError::Notebooks(ref lines) if lines.len() == 1));
        assert!(err.to_string().contains("cy.ipynb: no metadata for cheese"));
    }

    #[test]
    fn logins_that_cannot_be_headings_are_reported() {
        let (_dir, config) = setup();
        let nb_dir = config.component_path("spouses");
        let nb = Notebook::new(vec![answer_cell("cheese", "gouda"), plot_cell()]);
        write_notebook(&nb_dir.join("smith-j.ipynb"), &nb).unwrap();

        let err = extract_manual(&config, "spouses", false).unwrap_err();
        assert!(matches!(err, GradeError::Notebooks(ref lines) if lines.len() == 1));
        assert!(err.to_string().contains("login `smith-j` is not usable as a heading"));
        assert!(!config.marking_path("spouses").join("cheese_report.md").exists());

        let err = extract_plots(&config, "spouses", false).unwrap_err();
        assert!(err.to_string().contains("smith-j.ipynb"));
        assert!(!config.plot_notebook_path("spouses").exists());

        // Once renamed, the filled-in report parses.
        fs::rename(nb_dir.join("smith-j.ipynb"), nb_dir.join("smith_j.ipynb")).unwrap();
        let written = extract_manual(&config, "spouses", false).unwrap();
        let filled = fs::read_to_string(&written[0])
            .unwrap()
            .replace("MCPScore:", "MCPScore: 2");
        fs::write(&written[0], filled).unwrap();
        let report = read_manual(&written[0]).unwrap();
        assert_eq!(report.scores["smith_j"], 2.0);
        assert_eq!(report.scores.len(), 3);
    }

    #[test]
    fn plot_notebook_has_a_section_per_student() {
        let (_dir, config) = setup();
        let path = extract_plots(&config, "spouses", false).unwrap();
        let nb = read_notebook(&path).unwrap();
        assert_eq!(nb.cells.len(), 6);
        assert!(nb.cells[1].has_image_output());
        assert!(nb.cells[1].extra.get("id").is_none());

        let filled = fs::read_to_string(&path)
            .unwrap()
            .replace("* pp : ", "* pp : 1");
        fs::write(&path, filled).unwrap();
        let records = read_plot_scores(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records["bo"]["pp"], 1.0);
    }

    #[test]
    fn needs_submissions() {
        let dir = TempDir::new().unwrap();
        let text = format!(
            "base_path: {}\ncomponents:\n  spouses:\n    scaled_to: 10\n    actual_max: 10\n    \
             manual_qs: [cheese]\n",
            dir.path().display()
        );
        let config = parse_config(&text, dir.path()).unwrap();
        let err = extract_manual(&config, "spouses", false).unwrap_err();
        assert!(matches!(err, GradeError::MissingInput { .. }));

        let err = extract_plots(&config, "spouses", false).unwrap_err();
        assert!(err.to_string().contains("has no plot_qs"));
    }
}
