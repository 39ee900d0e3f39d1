use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use chrono::Utc;
use tracing::{debug, info};

use crate::error::{GradeError, Result};
use crate::models::{FinalTable, ScoreMap};

pub const MARK_COL: &str = "Mark";
pub const TOTAL_COL: &str = "Total";
pub const PERCENT_COL: &str = "Percent";

/// Reads `id_col` and `mark_col` from a CSV with a header row. Other columns
/// are ignored.
pub fn read_scores(path: &Path, id_col: &str, mark_col: &str) -> Result<ScoreMap> {
    let bad = |reason: String| GradeError::InvalidRecord {
        path: path.to_path_buf(),
        reason,
    };

    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    for col in [id_col, mark_col] {
        if !headers.iter().any(|h| h == col) {
            return Err(bad(format!("no `{col}` column")));
        }
    }

    let mut scores = ScoreMap::new();
    for (idx, result) in reader.deserialize::<HashMap<String, String>>().enumerate() {
        let row = result?;
        let row_no = idx + 2;
        let login = row.get(id_col).map(|s| s.trim()).unwrap_or_default();
        if login.is_empty() {
            return Err(bad(format!("row {row_no}: empty `{id_col}`")));
        }
        let raw = row.get(mark_col).map(|s| s.trim()).unwrap_or_default();
        let mark = raw
            .parse::<f64>()
            .ok()
            .filter(|mark| mark.is_finite())
            .ok_or_else(|| bad(format!("row {row_no}: `{raw}` is not a number for {login}")))?;
        if scores.insert(login.to_string(), mark).is_some() {
            return Err(bad(format!("row {row_no}: {login} appears twice")));
        }
    }

    debug!(path = %path.display(), students = scores.len(), "read scores");
    Ok(scores)
}

/// Like `read_scores`, but a missing file is an empty map.
pub fn read_optional_scores(path: &Path, id_col: &str, mark_col: &str) -> Result<ScoreMap> {
    if !path.is_file() {
        debug!(path = %path.display(), "no score file");
        return Ok(ScoreMap::new());
    }
    read_scores(path, id_col, mark_col)
}

pub fn write_scores(path: &Path, id_col: &str, scores: &ScoreMap) -> Result<()> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record([id_col, MARK_COL])?;
    for (login, mark) in scores {
        writer.write_record([login.as_str(), mark.to_string().as_str()])?;
    }
    let bytes = writer.into_inner().map_err(|err| err.into_error())?;
    atomic_write(path, &bytes)?;
    info!(path = %path.display(), students = scores.len(), "wrote scores");
    Ok(())
}

pub fn write_final(path: &Path, id_col: &str, table: &FinalTable) -> Result<()> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    let mut header = vec![id_col.to_string()];
    header.extend(table.components.iter().cloned());
    header.push(PERCENT_COL.to_string());
    header.push(TOTAL_COL.to_string());
    writer.write_record(&header)?;

    for row in &table.rows {
        let mut record = vec![row.student.clone()];
        record.extend(row.scaled.iter().map(f64::to_string));
        record.push(row.percent.to_string());
        record.push(row.total.to_string());
        writer.write_record(&record)?;
    }

    let bytes = writer.into_inner().map_err(|err| err.into_error())?;
    atomic_write(path, &bytes)?;
    info!(path = %path.display(), students = table.rows.len(), "wrote final grades");
    Ok(())
}

/// Writes next to `path` under a hidden temporary name, then renames over
/// `path`.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    let tmp = path.with_file_name(format!(
        ".{}.tmp.{}.{}",
        name,
        std::process::id(),
        Utc::now().timestamp_micros()
    ));

    let written = File::create(&tmp).and_then(|mut file| {
        file.write_all(bytes)?;
        file.sync_all()
    });
    if let Err(err) = written.and_then(|()| fs::rename(&tmp, path)) {
        let _ = fs::remove_file(&tmp);
        return Err(err.into());
    }
    Ok(())
}
