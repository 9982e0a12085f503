//! Append-only CSV output.

use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::record::{COLUMNS, EventRecord};

const LINE_END: &str = "\r\n";

/// Escape a string for CSV (handle commas, quotes and line breaks).
fn escape_csv(s: &str) -> String {
    if s.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

/// Render one CSV line (including the terminator) from cell values.
pub fn format_line<I, S>(cells: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut line = cells
        .into_iter()
        .map(|cell| escape_csv(cell.as_ref()))
        .collect::<Vec<_>>()
        .join(",");
    line.push_str(LINE_END);
    line
}

/// The header line for [`COLUMNS`].
pub fn header_line() -> String {
    format_line(COLUMNS)
}

/// Writes event records to a CSV file, one synced row per event.
pub struct RecordWriter {
    path: PathBuf,
    file: File,
    rows_written: u64,
}

impl RecordWriter {
    /// Open `path` for appending, writing the header if the file is new or
    /// empty. Existing content is never touched.
    pub async fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let needs_header = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata.len() == 0,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
            Err(e) => return Err(e),
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        let mut writer = Self {
            path,
            file,
            rows_written: 0,
        };

        if needs_header {
            writer.write_synced(&header_line()).await?;
            info!(path = %writer.path.display(), "Created output file");
        } else {
            info!(path = %writer.path.display(), "Appending to existing output file");
        }

        Ok(writer)
    }

    /// Append one row and sync it to disk before returning.
    pub async fn write(&mut self, record: &EventRecord) -> std::io::Result<()> {
        self.write_synced(&format_line(record.row())).await?;
        self.rows_written += 1;
        Ok(())
    }

    /// Rows appended by this writer.
    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write_synced(&mut self, line: &str) -> std::io::Result<()> {
        self.file.write_all(line.as_bytes()).await?;
        self.file.flush().await?;
        self.file.sync_data().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::SampledMetrics;

    #[test]
    fn test_escape_csv() {
        assert_eq!(escape_csv("plain"), "plain");
        assert_eq!(escape_csv("a,b"), "\"a,b\"");
        assert_eq!(escape_csv("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(escape_csv("two\nlines"), "\"two\nlines\"");
        assert_eq!(escape_csv(""), "");
    }

    #[test]
    fn test_header_line() {
        assert_eq!(
            header_line(),
            "timestamp,input_text,input_language,translated_text,output_language,\
stt_latency_ms,translation_latency_ms,tts_latency_ms,total_latency_ms,\
estimated_tokens,tokens_per_second,cpu_usage,memory_usage_mb\r\n"
        );
    }

    #[tokio::test]
    async fn test_fresh_file_gets_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.csv");

        let mut writer = RecordWriter::open(&path).await.unwrap();
        for text in ["one", "two, three"] {
            let record = EventRecord::from_payload(&format!(r#"{{"input_text": "{}"}}"#, text))
                .unwrap()
                .with_metrics(&SampledMetrics::default());
            writer.write(&record).await.unwrap();
        }
        assert_eq!(writer.rows_written(), 2);

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = content.split_terminator("\r\n").collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(format!("{}\r\n", lines[0]), header_line());
        assert_eq!(lines[1], ",one,,,,,,,,,,0%,0.0");
        assert_eq!(lines[2], ",\"two, three\",,,,,,,,,,0%,0.0");
    }

    #[tokio::test]
    async fn test_empty_existing_file_gets_header() {
        let file = tempfile::NamedTempFile::new().unwrap();

        RecordWriter::open(file.path()).await.unwrap();

        let content = tokio::fs::read_to_string(file.path()).await.unwrap();
        assert_eq!(content, header_line());
    }
}
