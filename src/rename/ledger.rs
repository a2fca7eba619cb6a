//! Rename mapping ledger
//!
//! One CSV row per processed image, header
//! `src_dir,old_name,ocr_text,base,final_name,status`. The file is the audit
//! trail of why each rename happened.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::path::Path;
use tracing::debug;

/// Column header of the ledger
pub const LEDGER_HEADER: [&str; 6] = ["src_dir", "old_name", "ocr_text", "base", "final_name", "status"];

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Per-image pipeline status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    ReadFail,
    NoDet,
    NoText,
    Planned,
    RenamedOk,
    RenamedFail,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::ReadFail => "READ_FAIL",
            Status::NoDet => "NO_DET",
            Status::NoText => "NO_TEXT",
            Status::Planned => "PLANNED",
            Status::RenamedOk => "RENAMED_OK",
            Status::RenamedFail => "RENAMED_FAIL",
        }
    }

    /// Whether no further pipeline stage will change this status
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Status::Planned)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One ledger line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRow {
    pub src_dir: String,
    pub old_name: String,
    pub ocr_text: String,
    pub base: String,
    pub final_name: String,
    pub status: Status,
}

/// Write `rows` to `path`, replacing any previous file.
///
/// The content goes to a sibling temp file first and is renamed into place,
/// so readers never see a half-written ledger.
pub fn write_mapping(path: &Path, rows: &[LedgerRow]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create ledger directory {:?}", parent))?;
    }

    let mut buffer = Vec::with_capacity(64 * (rows.len() + 1));
    buffer.write_all(UTF8_BOM)?;
    {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(&mut buffer);
        writer.write_record(LEDGER_HEADER)?;
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = std::path::PathBuf::from(tmp_name);

    std::fs::write(&tmp_path, &buffer)
        .with_context(|| format!("Failed to write ledger temp file {:?}", tmp_path))?;
    std::fs::rename(&tmp_path, path)
        .with_context(|| format!("Failed to move ledger into place at {:?}", path))?;

    debug!("Wrote {} ledger rows to {:?}", rows.len(), path);
    Ok(())
}

/// Read a ledger written by [`write_mapping`]
pub fn read_mapping(path: &Path) -> Result<Vec<LedgerRow>> {
    let data = std::fs::read(path).with_context(|| format!("Failed to read ledger {:?}", path))?;
    let data = data.strip_prefix(UTF8_BOM).unwrap_or(&data[..]);

    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(data);
    let rows = reader
        .deserialize()
        .collect::<std::result::Result<Vec<LedgerRow>, _>>()
        .context("Malformed ledger row")?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn row(name: &str, text: &str, status: Status) -> LedgerRow {
        LedgerRow {
            src_dir: "/in/a".to_string(),
            old_name: name.to_string(),
            ocr_text: text.to_string(),
            base: String::new(),
            final_name: String::new(),
            status,
        }
    }

    #[test]
    fn test_header_only_ledger() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rename_mapping.csv");

        write_mapping(&path, &[]).unwrap();

        let content = std::fs::read(&path).unwrap();
        assert!(content.starts_with(UTF8_BOM));
        let text = String::from_utf8(content[UTF8_BOM.len()..].to_vec()).unwrap();
        assert_eq!(text, "src_dir,old_name,ocr_text,base,final_name,status\n");
        assert!(read_mapping(&path).unwrap().is_empty());
    }

    #[test]
    fn test_rows_keep_order_and_quoting() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/map.csv");
        let rows = vec![
            row("b.png", "", Status::ReadFail),
            row("a.png", "TAG, \"one\"\nline", Status::NoText),
            LedgerRow {
                base: "TAG".to_string(),
                final_name: "TAG-1.png".to_string(),
                ..row("c.png", "tag", Status::Planned)
            },
        ];

        write_mapping(&path, &rows).unwrap();
        assert_eq!(read_mapping(&path).unwrap(), rows);
        assert!(!dir.path().join("nested/map.csv.tmp").exists());
    }

    #[test]
    fn test_overwrites_previous_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("map.csv");

        write_mapping(&path, &[row("a.png", "x", Status::Planned)]).unwrap();
        write_mapping(&path, &[row("a.png", "x", Status::RenamedOk)]).unwrap();

        let rows = read_mapping(&path).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, Status::RenamedOk);
    }

    #[test]
    fn test_status_terminality() {
        assert!(!Status::Planned.is_terminal());
        assert!(Status::NoDet.is_terminal());
        assert_eq!(Status::RenamedFail.to_string(), "RENAMED_FAIL");
    }
}
