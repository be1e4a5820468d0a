//! Spreadsheet sink: one delimited row per record, appended to a file.
//!
//! Rows use the canonical column order from [`ProfileRecord::to_row`]; the
//! URL column (third) is the dedup key against rows already in the sheet.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::mem::take;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use super::{RecordSink, SinkError, SinkOutcome};
use crate::config::SheetFormat;
use crate::models::{row_headers, ProfileRecord};

const URL_COLUMN: usize = 2;

pub struct SheetSink {
    path: PathBuf,
    delimiter: char,
    known_urls: Mutex<HashSet<String>>,
}

impl SheetSink {
    /// Open (or create, with a header row) the sheet at `path` and load the
    /// URLs it already holds.
    pub fn open(path: impl AsRef<Path>, format: SheetFormat) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        let delimiter = format.delimiter();

        let mut known = HashSet::new();
        let is_blank = fs::metadata(&path).map_or(true, |meta| meta.len() == 0);
        if is_blank {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            let mut file = fs::File::create(&path)?;
            write_row(&mut file, &row_headers(), delimiter)?;
        } else {
            let text = fs::read_to_string(&path)?;
            for row in parse_rows(&text, delimiter) {
                if let Some(url) = row.get(URL_COLUMN) {
                    known.insert(url.clone());
                }
            }
        }

        Ok(Self {
            path,
            delimiter,
            known_urls: Mutex::new(known),
        })
    }
}

#[async_trait]
impl RecordSink for SheetSink {
    fn name(&self) -> &'static str {
        "sheet"
    }

    async fn submit(&self, record: &ProfileRecord) -> Result<SinkOutcome, SinkError> {
        let mut known = self
            .known_urls
            .lock()
            .map_err(|_| SinkError::Poisoned("sheet"))?;
        if known.contains(&record.detail_url) {
            debug!(url = %record.detail_url, "row already in sheet");
            return Ok(SinkOutcome::AlreadyPresent);
        }

        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        write_row(&mut file, &record.to_row(), self.delimiter)?;
        known.insert(record.detail_url.clone());
        Ok(SinkOutcome::Stored)
    }
}

// ── Delimited text ───────────────────────────────────────────────────────────

fn needs_quotes(field: &str, sep: char) -> bool {
    field.contains(sep) || field.contains('"') || field.contains('\n') || field.contains('\r')
}

fn write_row<W: Write>(mut w: W, row: &[String], sep: char) -> io::Result<()> {
    let mut line = String::new();
    for (i, cell) in row.iter().enumerate() {
        if i > 0 {
            line.push(sep);
        }
        if needs_quotes(cell, sep) {
            line.push('"');
            line.push_str(&cell.replace('"', "\"\""));
            line.push('"');
        } else {
            line.push_str(cell);
        }
    }
    line.push('\n');
    w.write_all(line.as_bytes())
}

/// Quote- and CRLF-tolerant reader for the rows written above.
fn parse_rows(text: &str, sep: char) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    field.push('"');
                } else {
                    in_quotes = false;
                }
            }
            '"' if field.is_empty() => in_quotes = true,
            c if c == sep && !in_quotes => row.push(take(&mut field)),
            '\n' | '\r' if !in_quotes => {
                if ch == '\r' && chars.peek() == Some(&'\n') {
                    chars.next();
                }
                row.push(take(&mut field));
                if !(row.len() == 1 && row[0].is_empty()) {
                    rows.push(take(&mut row));
                } else {
                    row.clear();
                }
            }
            _ => field.push(ch),
        }
    }

    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }
    rows
}
