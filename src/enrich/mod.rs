//! Post-processing of the merged listings into the tables that get persisted.

pub mod market;
pub mod rate;

use anyhow::Result;

use crate::parser::merge::{UnifiedRecord, RAW_COLUMNS};

pub use market::MarketEnricher;

/// A string table with a fixed column order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    /// Raw schema: one row per record in `RAW_COLUMNS` order.
    pub fn from_records(records: &[UnifiedRecord]) -> Self {
        Self {
            columns: RAW_COLUMNS.iter().map(|c| c.to_string()).collect(),
            rows: records.iter().map(UnifiedRecord::to_row).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
impl Table {
    pub fn column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Cell by row index and column name.
    pub fn cell(&self, row: usize, column: &str) -> Option<&str> {
        let col = self.column(column)?;
        self.rows.get(row)?.get(col).map(String::as_str)
    }
}

/// Turns the merged record set into the table that gets persisted.
pub trait Enricher {
    fn enrich(&self, records: &[UnifiedRecord]) -> Result<Table>;
}

/// No derived columns; the raw schema as is.
pub struct RawTable;

impl Enricher for RawTable {
    fn enrich(&self, records: &[UnifiedRecord]) -> Result<Table> {
        Ok(Table::from_records(records))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_search_page;

    #[test]
    fn raw_table_keeps_raw_schema() {
        let html = std::fs::read_to_string("tests/fixtures/search_page.html").unwrap();
        let records = parse_search_page(&html).unwrap();
        let table = RawTable.enrich(&records).unwrap();

        assert_eq!(table.len(), 3);
        assert_eq!(table.columns.len(), RAW_COLUMNS.len());
        assert_eq!(table.cell(0, "id"), Some("6123456789"));
        assert_eq!(table.cell(0, "price"), Some("69900"));
        assert_eq!(table.cell(0, "source"), Some("json_ld"));
        assert_eq!(table.cell(2, "source"), Some(""));
        assert_eq!(table.cell(2, "match_confidence"), Some("unmatched"));
        assert_eq!(table.cell(0, "nope"), None);
        assert_eq!(table.cell(7, "id"), None);
    }

    #[test]
    fn empty_input_is_empty_table() {
        let table = RawTable.enrich(&[]).unwrap();
        assert!(table.is_empty());
        assert_eq!(table.columns.len(), RAW_COLUMNS.len());
    }
}
