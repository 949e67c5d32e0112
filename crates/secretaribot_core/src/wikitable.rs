//! Pipe-table codec
//!
//! Reads a MediaWiki `{| ... |}` table into column keys, header labels and
//! rows, and writes it back in the same layout so a refreshed table can be
//! compared against the live page text.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// One table row: column key -> trimmed cell text. Column order lives in
/// [`WikiTable::fields`], not in the row.
pub type Row = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TableError {
    #[error("no table opening line (`{{|`) found")]
    MissingOpen,
    #[error("table is never closed (`|}}` missing)")]
    MissingClose,
    #[error("line {line}: row has more cells than the {columns} declared columns")]
    TooManyCells { line: usize, columns: usize },
    #[error("line {line}: duplicate column key `{key}`")]
    DuplicateField { line: usize, key: String },
    #[error("row {row}: `{key}` is not a column of this table")]
    SchemaMismatch { row: usize, key: String },
    #[error("row {row}: value for `{key}` contains a line break")]
    MultilineCell { row: usize, key: String },
    #[error("row {row}: value for `{key}` has leading or trailing whitespace")]
    UntrimmedCell { row: usize, key: String },
    #[error("row {row}: row has no cells")]
    EmptyRow { row: usize },
    #[error("row {row}: `{key}` is set but an earlier column is not")]
    SparseRow { row: usize, key: String },
}

impl TableError {
    /// True for errors raised while reading markup, as opposed to errors in
    /// replacement rows.
    pub fn is_malformed_markup(&self) -> bool {
        matches!(
            self,
            Self::MissingOpen
                | Self::MissingClose
                | Self::TooManyCells { .. }
                | Self::DuplicateField { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WikiTable {
    header: String,
    fields: Vec<String>,
    labels: Vec<String>,
    rows: Vec<Row>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    Init,
    InTable,
    NewRow,
    InRow,
}

impl WikiTable {
    /// Parse pipe-table markup. Only the first table in `markup` is read;
    /// anything after its `|}` line is ignored.
    pub fn decode(markup: &str) -> Result<Self, TableError> {
        let mut state = ParseState::Init;
        let mut header = String::new();
        let mut fields: Vec<String> = Vec::new();
        let mut labels = Vec::new();
        let mut rows = Vec::new();
        let mut row = Row::new();
        let mut column = 0usize;
        let mut data_started = false;
        let mut closed = false;

        for (index, raw_line) in markup.lines().enumerate() {
            let line_number = index + 1;
            let line = raw_line.trim();

            if state == ParseState::Init {
                if line.starts_with("{|") {
                    header = line.to_string();
                    state = ParseState::InTable;
                }
                continue;
            }

            if let Some(label) = line.strip_prefix('!') {
                if matches!(state, ParseState::InTable | ParseState::NewRow) && !data_started {
                    let label = label.trim().to_string();
                    let key = field_key(&label);
                    if fields.contains(&key) {
                        return Err(TableError::DuplicateField {
                            line: line_number,
                            key,
                        });
                    }
                    fields.push(key);
                    labels.push(label);
                }
                continue;
            }

            if line.starts_with("|-") {
                if !row.is_empty() {
                    rows.push(std::mem::take(&mut row));
                }
                state = ParseState::NewRow;
                continue;
            }

            if line.starts_with("|}") {
                if !row.is_empty() {
                    rows.push(std::mem::take(&mut row));
                }
                closed = true;
                break;
            }

            let Some(cell) = line.strip_prefix('|') else {
                continue;
            };
            match state {
                ParseState::NewRow => {
                    column = 0;
                    row = Row::new();
                    state = ParseState::InRow;
                    data_started = true;
                }
                ParseState::InRow => {}
                ParseState::Init | ParseState::InTable => continue,
            }

            let key = fields.get(column).ok_or(TableError::TooManyCells {
                line: line_number,
                columns: fields.len(),
            })?;
            row.insert(key.clone(), cell.trim().to_string());
            column += 1;
        }

        if state == ParseState::Init {
            return Err(TableError::MissingOpen);
        }
        if !closed {
            return Err(TableError::MissingClose);
        }

        Ok(Self {
            header,
            fields,
            labels,
            rows,
        })
    }

    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(self.header.len() + 64 * (self.rows.len() + 1));
        out.push_str(&self.header);
        out.push_str("\n|-\n");
        for label in &self.labels {
            out.push_str("! ");
            out.push_str(label);
            out.push('\n');
        }
        for row in &self.rows {
            out.push_str("|-\n");
            for field in &self.fields {
                if let Some(value) = row.get(field) {
                    out.push_str("| ");
                    out.push_str(value);
                    out.push('\n');
                }
            }
        }
        out.push_str("|}");
        out
    }

    /// Build a new table with this table's header and columns and `rows`
    /// as its body. `self` is left untouched.
    ///
    /// Rows must read back unchanged once encoded: cells are single-line and
    /// trimmed, every row has at least one cell, and the cells a row has form
    /// a prefix of the columns (a missing middle cell would shift the ones
    /// after it).
    pub fn with_rows(&self, rows: Vec<Row>) -> Result<Self, TableError> {
        for (index, row) in rows.iter().enumerate() {
            if row.is_empty() {
                return Err(TableError::EmptyRow { row: index });
            }
            for (key, value) in row {
                if !self.fields.contains(key) {
                    return Err(TableError::SchemaMismatch {
                        row: index,
                        key: key.clone(),
                    });
                }
                if value.contains(['\n', '\r']) {
                    return Err(TableError::MultilineCell {
                        row: index,
                        key: key.clone(),
                    });
                }
                if value.trim() != value {
                    return Err(TableError::UntrimmedCell {
                        row: index,
                        key: key.clone(),
                    });
                }
            }
            let present = self
                .fields
                .iter()
                .take_while(|field| row.contains_key(*field))
                .count();
            if let Some(key) = self.fields[present..]
                .iter()
                .find(|field| row.contains_key(*field))
            {
                return Err(TableError::SparseRow {
                    row: index,
                    key: key.clone(),
                });
            }
        }

        Ok(Self {
            header: self.header.clone(),
            fields: self.fields.clone(),
            labels: self.labels.clone(),
            rows,
        })
    }

    pub fn header(&self) -> &str {
        &self.header
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn has_field(&self, key: &str) -> bool {
        self.fields.iter().any(|field| field == key)
    }
}

impl FromStr for WikiTable {
    type Err = TableError;

    fn from_str(markup: &str) -> Result<Self, Self::Err> {
        Self::decode(markup)
    }
}

impl fmt::Display for WikiTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Column key for a header label: lowercased, anything outside `a-z`
/// becomes `-` (`"Last Modified"` -> `last-modified`).
pub fn field_key(label: &str) -> String {
    label
        .trim()
        .to_lowercase()
        .chars()
        .map(|ch| if ch.is_ascii_lowercase() { ch } else { '-' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{Row, TableError, WikiTable, field_key};

    const WATCHLIST: &str = "{| class=\"wikitable\"
|-
! URL
! Etag
! Last Modified
|-
| http://example.org/a
| foo
| bar
|}";

    fn row(pairs: &[(&str, &str)]) -> Row {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn decode_reads_header_fields_and_rows() {
        let table = WikiTable::decode(WATCHLIST).expect("decode");
        assert_eq!(table.header(), "{| class=\"wikitable\"");
        assert_eq!(table.fields(), ["url", "etag", "last-modified"]);
        assert_eq!(table.labels(), ["URL", "Etag", "Last Modified"]);
        assert_eq!(
            table.rows(),
            [row(&[
                ("url", "http://example.org/a"),
                ("etag", "foo"),
                ("last-modified", "bar"),
            ])]
        );
    }

    #[test]
    fn encode_reproduces_watchlist_markup() {
        let table = WikiTable::decode(WATCHLIST).expect("decode");
        assert_eq!(table.encode(), WATCHLIST);
        assert_eq!(table.to_string(), WATCHLIST);
    }

    #[test]
    fn with_rows_changes_only_the_replaced_cell() {
        let table = WikiTable::decode(WATCHLIST).expect("decode");
        let mut rows = table.rows().to_vec();
        rows[0].insert("url".to_string(), "blah".to_string());

        let changed = table.with_rows(rows).expect("copy");
        assert_eq!(
            changed.encode(),
            WATCHLIST.replace("| http://example.org/a", "| blah")
        );
        assert_eq!(table.encode(), WATCHLIST);
    }

    #[test]
    fn with_rows_rejects_unknown_columns() {
        let table = WikiTable::decode(WATCHLIST).expect("decode");
        let error = table
            .with_rows(vec![row(&[("url", "x")]), row(&[("status", "200")])])
            .expect_err("unknown key");
        assert_eq!(
            error,
            TableError::SchemaMismatch {
                row: 1,
                key: "status".to_string()
            }
        );
        assert!(!error.is_malformed_markup());
    }

    #[test]
    fn with_rows_rejects_line_breaks_in_cells() {
        let table = WikiTable::decode(WATCHLIST).expect("decode");
        let error = table
            .with_rows(vec![row(&[("etag", "a\n| b")])])
            .expect_err("multiline");
        assert!(matches!(error, TableError::MultilineCell { row: 0, .. }));
    }

    #[test]
    fn with_rows_rejects_rows_that_would_not_read_back() {
        let table = WikiTable::decode(WATCHLIST).expect("decode");

        assert_eq!(
            table.with_rows(vec![row(&[("url", "a")]), Row::new()]),
            Err(TableError::EmptyRow { row: 1 })
        );
        assert_eq!(
            table.with_rows(vec![row(&[("url", "  x ")])]),
            Err(TableError::UntrimmedCell {
                row: 0,
                key: "url".to_string()
            })
        );
        assert_eq!(
            table.with_rows(vec![row(&[("url", "x"), ("last-modified", "y")])]),
            Err(TableError::SparseRow {
                row: 0,
                key: "last-modified".to_string()
            })
        );
    }

    #[test]
    fn accepted_rows_survive_a_second_pass() {
        let table = WikiTable::decode(WATCHLIST).expect("decode");
        let replaced = table
            .with_rows(vec![
                row(&[("url", "x"), ("etag", "")]),
                row(&[("url", "-y"), ("etag", "!z"), ("last-modified", "}")]),
            ])
            .expect("rows");
        let encoded = replaced.encode();
        let reread = WikiTable::decode(&encoded).expect("decode encoded");
        assert_eq!(reread, replaced);
        assert_eq!(reread.encode(), encoded);
    }

    #[test]
    fn decode_rejects_extra_cells() {
        let markup = "{|\n|-\n! A\n|-\n| one\n| two\n|}";
        let error = WikiTable::decode(markup).expect_err("too many cells");
        assert_eq!(error, TableError::TooManyCells { line: 6, columns: 1 });
        assert!(error.is_malformed_markup());
    }

    #[test]
    fn decode_requires_delimiters() {
        assert_eq!(
            WikiTable::decode("just text\n| a\n|}"),
            Err(TableError::MissingOpen)
        );
        assert_eq!(
            WikiTable::decode("{|\n|-\n! A\n|-\n| a\n"),
            Err(TableError::MissingClose)
        );
    }

    #[test]
    fn decode_rejects_duplicate_column_keys() {
        let markup = "{|\n|-\n! Last Modified\n! last-modified\n|}";
        let error = WikiTable::decode(markup).expect_err("duplicate");
        assert_eq!(
            error,
            TableError::DuplicateField {
                line: 4,
                key: "last-modified".to_string()
            }
        );
    }

    #[test]
    fn decode_accepts_header_cells_directly_after_open() {
        let table = WikiTable::decode("{|\n! A\n! B\n|-\n| 1\n| 2\n|}").expect("decode");
        assert_eq!(table.fields(), ["a", "b"]);
        assert_eq!(table.rows().len(), 1);
    }

    #[test]
    fn header_cells_after_data_rows_are_not_columns() {
        let markup = "{|\n|-\n! A\n|-\n| 1\n|-\n! B\n|-\n| 2\n|}";
        let table = WikiTable::decode(markup).expect("decode");
        assert_eq!(table.fields(), ["a"]);
        assert_eq!(table.rows(), [row(&[("a", "1")]), row(&[("a", "2")])]);
    }

    #[test]
    fn decode_ignores_text_outside_the_table() {
        let markup = "Intro text\n\n{| class=\"wikitable\"\n|-\n! A\n|-\n| 1\n|}\n[[Category:Bots]]";
        let table = WikiTable::decode(markup).expect("decode");
        assert_eq!(table.rows(), [row(&[("a", "1")])]);
    }

    #[test]
    fn empty_rows_are_not_committed() {
        let table = WikiTable::decode("{|\n|-\n! A\n|-\n|-\n|-\n| x\n|-\n|}").expect("decode");
        assert_eq!(table.rows(), [row(&[("a", "x")])]);
    }

    #[test]
    fn short_rows_omit_missing_cells_when_encoded() {
        let markup = "{|\n|-\n! A\n! B\n|-\n| only\n|}";
        let table = WikiTable::decode(markup).expect("decode");
        assert_eq!(table.rows(), [row(&[("a", "only")])]);
        assert_eq!(table.encode(), "{|\n|-\n! A\n! B\n|-\n| only\n|}");
    }

    #[test]
    fn hand_written_whitespace_is_normalized() {
        let markup = "  {| class=\"wikitable\"  \n|-\n!URL   \n|-\n|http://a  \n|}";
        let table = WikiTable::decode(markup).expect("decode");
        assert_eq!(table.encode(), "{| class=\"wikitable\"\n|-\n! URL\n|-\n| http://a\n|}");
    }

    #[test]
    fn field_key_replaces_non_letters() {
        assert_eq!(field_key("Last Modified"), "last-modified");
        assert_eq!(field_key(" URL "), "url");
        assert_eq!(field_key("HTTP/2 Status"), "http---status");
    }
}
