use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use tracing::{info, warn};

use crate::enrich::Table;

pub const RAW_PREFIX: &str = "raw_listings";
pub const PROCESSED_PREFIX: &str = "processed_listings";

/// `<dir>/<prefix>_<YYYYMMDD>.csv`
pub fn dated_csv_path(dir: &Path, prefix: &str, date: NaiveDate) -> PathBuf {
    dir.join(format!("{}_{}.csv", prefix, date.format("%Y%m%d")))
}

/// Write `table` to `path`. A non-empty existing file gets the rows appended without a header;
/// anything else is created with one. Returns the number of rows written.
pub fn write_table(path: &Path, table: &Table) -> Result<usize> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let appending = std::fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false);
    if appending {
        check_header(path, &table.columns);
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mut wtr = csv::WriterBuilder::new().has_headers(false).from_writer(file);

    if !appending {
        wtr.write_record(&table.columns)?;
    }
    for row in &table.rows {
        wtr.write_record(row)?;
    }
    wtr.flush()?;

    info!(
        "{} {} rows: {}",
        if appending { "Appended" } else { "Saved" },
        table.len(),
        path.display()
    );
    Ok(table.len())
}

/// Appending under a different schema is allowed but worth a warning.
fn check_header(path: &Path, columns: &[String]) {
    let existing = csv::Reader::from_path(path).and_then(|mut r| r.headers().cloned());
    match existing {
        Ok(headers) if headers.iter().ne(columns.iter().map(String::as_str)) => {
            warn!("Column layout of {} differs from the rows being appended", path.display());
        }
        Ok(_) => {}
        Err(e) => warn!("Could not read header of {}: {}", path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(rows: &[[&str; 2]]) -> Table {
        Table {
            columns: vec!["id".into(), "title".into()],
            rows: rows
                .iter()
                .map(|r| r.iter().map(|c| c.to_string()).collect())
                .collect(),
        }
    }

    #[test]
    fn dated_file_names() {
        let date = NaiveDate::from_ymd_opt(2026, 1, 2).unwrap();
        assert_eq!(
            dated_csv_path(Path::new("data/raw_csv"), RAW_PREFIX, date),
            PathBuf::from("data/raw_csv/raw_listings_20260102.csv")
        );
        assert_eq!(
            dated_csv_path(Path::new("out"), PROCESSED_PREFIX, date),
            PathBuf::from("out/processed_listings_20260102.csv")
        );
    }

    #[test]
    fn new_file_gets_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw_csv/raw.csv");
        let written = write_table(&path, &table(&[["1", "Kamiq, 1.0 TSI"]])).unwrap();
        assert_eq!(written, 1);
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "id,title\n1,\"Kamiq, 1.0 TSI\"\n"
        );
    }

    #[test]
    fn second_run_appends_without_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw.csv");
        write_table(&path, &table(&[["1", "a"]])).unwrap();
        write_table(&path, &table(&[["2", "b"], ["3", "c"]])).unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "id,title\n1,a\n2,b\n3,c\n"
        );
    }

    #[test]
    fn empty_existing_file_is_rewritten_with_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw.csv");
        std::fs::write(&path, "").unwrap();
        write_table(&path, &table(&[["1", "a"]])).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "id,title\n1,a\n");
    }
}
