//! Append-only JSON-lines completion logs
//!
//! Generation drivers append one [`CompletionRecord`] per line. Logs may be
//! read while a producer is still writing (or after it was interrupted), so
//! the reader skips lines it cannot parse instead of failing the pass.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Name of the field holding the generated text
pub const COMPLETION_FIELD: &str = "completion_only";

/// Prompting strategy recorded with each completion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptType {
    /// Fixed prompt only
    NormalPrompt,
    /// Random corpus document prepended to the fixed prompt
    RandomDoc,
}

/// Per-token detail stored alongside a completion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenDetail {
    pub token: String,
    pub entropy: f64,
    pub perplexity: f64,
}

/// One generated completion as written to the log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub prompt: String,
    pub full_output: String,
    pub completion_only: String,
    pub model: String,
    pub completion_idx: usize,
    pub avg_token_entropy: f64,
    pub avg_token_perplexity: f64,
    pub prompt_type: PromptType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub random_doc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub random_doc_file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_details: Option<Vec<TokenDetail>>,
}

impl CompletionRecord {
    /// Look up a string field of a raw record; absent or non-string is `None`
    pub fn text_field<'a>(value: &'a serde_json::Value, field: &str) -> Option<&'a str> {
        value.get(field).and_then(serde_json::Value::as_str)
    }
}

/// Result of reading a log
#[derive(Debug, Default)]
pub struct LogRead {
    /// Successfully parsed lines, in file order
    pub records: Vec<serde_json::Value>,
    /// Lines that failed to parse
    pub skipped: usize,
}

impl LogRead {
    /// Typed view of the records; lines that do not match the schema are dropped
    pub fn completions(&self) -> Vec<CompletionRecord> {
        self.records
            .iter()
            .filter_map(|v| serde_json::from_value(v.clone()).ok())
            .collect()
    }
}

/// Parse JSON lines from any reader, skipping blank and malformed lines.
///
/// Lines are split on raw bytes, so a line torn inside a multi-byte
/// character is skipped like any other unparseable line. Read errors are
/// still fatal.
pub fn parse_lines<R: BufRead>(reader: R) -> Result<LogRead> {
    let mut out = LogRead::default();

    for (line_no, line) in reader.split(b'\n').enumerate() {
        let line = line.with_context(|| format!("Failed to read line {}", line_no + 1))?;
        let trimmed = line.trim_ascii();
        if trimmed.is_empty() {
            continue;
        }

        match serde_json::from_slice::<serde_json::Value>(trimmed) {
            Ok(value) => out.records.push(value),
            Err(e) => {
                let preview: String = String::from_utf8_lossy(trimmed).chars().take(50).collect();
                warn!(
                    "Could not parse line {}: {}... ({})",
                    line_no + 1,
                    preview,
                    e
                );
                out.skipped += 1;
            }
        }
    }

    Ok(out)
}

/// Read a JSONL log file
pub fn read_records(path: &Path) -> Result<LogRead> {
    let file =
        File::open(path).with_context(|| format!("Failed to open log {}", path.display()))?;
    let read = parse_lines(BufReader::new(file))?;
    debug!(
        "Read {} records from {} ({} skipped)",
        read.records.len(),
        path.display(),
        read.skipped
    );
    Ok(read)
}

/// Appends records to a JSONL log, one object per line
pub struct LogWriter {
    path: PathBuf,
    file: File,
}

impl LogWriter {
    /// Open `path` for appending, creating parent directories as needed
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open {} for append", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    /// Serialize and append one record, flushing immediately
    pub fn append<T: Serialize>(&mut self, record: &T) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        self.file
            .write_all(line.as_bytes())
            .with_context(|| format!("Failed to append to {}", self.path.display()))?;
        self.file.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record(idx: usize) -> CompletionRecord {
        CompletionRecord {
            prompt: "Write a haiku:".into(),
            full_output: "Write a haiku: leaves fall".into(),
            completion_only: "leaves fall".into(),
            model: "allenai/OLMo-1B-0724-hf".into(),
            completion_idx: idx,
            avg_token_entropy: 1.5,
            avg_token_perplexity: 2.9,
            prompt_type: PromptType::NormalPrompt,
            original_prompt: None,
            random_doc: None,
            random_doc_file_path: None,
            token_details: None,
        }
    }

    #[test]
    fn test_parse_lines_skips_torn_line() {
        let input = "{\"completion_only\": \"a b\"}\n\nnot json\n{\"completion_only\": \"c\"";
        let read = parse_lines(input.as_bytes()).unwrap();
        assert_eq!(read.records.len(), 1);
        assert_eq!(read.skipped, 2);
    }

    #[test]
    fn test_parse_lines_skips_line_torn_mid_character() {
        let mut input = b"{\"completion_only\": \"caf\xC3\xA9 ok\"}\n".to_vec();
        input.extend_from_slice(b"{\"completion_only\": \"caf\xC3");
        let read = parse_lines(input.as_slice()).unwrap();
        assert_eq!(read.records.len(), 1);
        assert_eq!(read.skipped, 1);
        assert_eq!(read.records[0][COMPLETION_FIELD], "caf\u{e9} ok");
    }

    #[test]
    fn test_parse_lines_skips_invalid_utf8_in_middle() {
        let input = b"{\"completion_only\": \"a\"}\r\n{\"completion_only\": \"\xFF\xFE\"}\n{\"completion_only\": \"b\"}\n";
        let read = parse_lines(&input[..]).unwrap();
        assert_eq!(read.records.len(), 2);
        assert_eq!(read.skipped, 1);
        assert_eq!(read.records[1][COMPLETION_FIELD], "b");
    }

    #[test]
    fn test_text_field_lookup() {
        let value: serde_json::Value =
            serde_json::from_str(r#"{"completion_only": "x y", "n": 3}"#).unwrap();
        assert_eq!(CompletionRecord::text_field(&value, COMPLETION_FIELD), Some("x y"));
        assert_eq!(CompletionRecord::text_field(&value, "n"), None);
        assert_eq!(CompletionRecord::text_field(&value, "missing"), None);
    }

    #[test]
    fn test_prompt_type_serialization() {
        let json = serde_json::to_string(&sample_record(0)).unwrap();
        assert!(json.contains(r#""prompt_type":"normal_prompt""#));
        assert!(!json.contains("random_doc"));
    }

    #[test]
    fn test_writer_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("log.jsonl");

        {
            let mut writer = LogWriter::open(&path).unwrap();
            writer.append(&sample_record(0)).unwrap();
        }
        {
            let mut writer = LogWriter::open(&path).unwrap();
            writer.append(&sample_record(1)).unwrap();
        }

        let read = read_records(&path).unwrap();
        assert_eq!(read.skipped, 0);
        let completions = read.completions();
        assert_eq!(completions.len(), 2);
        assert_eq!(completions[1].completion_idx, 1);
    }
}
