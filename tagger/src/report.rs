use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};

pub(crate) const REPORT_HEADER: &str = "Filename,Title,Keywords";

/// Append-only tabular report for video results. The header is written
/// exactly once, when the file does not exist at open time; an existing
/// file is assumed to already carry it.
pub(crate) struct VideoReport {
    path: PathBuf,
    header_pending: bool,
}

impl VideoReport {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let header_pending = !path.exists();
        Self {
            path,
            header_pending,
        }
    }

    pub fn append(&mut self, filename: &str, title: &str, keywords: &[String]) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open report {}", self.path.display()))?;

        if self.header_pending {
            writeln!(file, "{REPORT_HEADER}").context("failed to write report header")?;
            self.header_pending = false;
        }

        writeln!(
            file,
            "{},{},{}",
            csv_field(filename),
            csv_field(title),
            csv_field(&keywords.join(", "))
        )
        .context("failed to write report row")?;
        Ok(())
    }
}

/// Quotes a field when it contains the column delimiter, a quote or a line
/// break, so the comma-joined keyword column survives re-parsing.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    // N appends produce exactly one header followed by N rows.
    #[test]
    fn header_is_written_once() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("results.csv");
        let mut report = VideoReport::open(&path);

        for idx in 0..3 {
            report
                .append(
                    &format!("clip{idx}.mp4"),
                    "A Title",
                    &["one".to_string(), "two".to_string()],
                )
                .unwrap();
        }

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], REPORT_HEADER);
        assert_eq!(
            contents.matches(REPORT_HEADER).count(),
            1,
            "header must appear exactly once"
        );
    }

    // A pre-existing file is treated as already carrying the header.
    #[test]
    fn existing_file_gets_no_second_header() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("results.csv");
        fs::write(&path, format!("{REPORT_HEADER}\nold.mp4,Old,\n")).unwrap();

        let mut report = VideoReport::open(&path);
        report.append("new.mp4", "New", &[]).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.matches(REPORT_HEADER).count(), 1);
        assert!(contents.ends_with("new.mp4,New,\n"));
    }

    #[test]
    fn keyword_column_is_quoted() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("results.csv");
        let mut report = VideoReport::open(&path);

        report
            .append(
                "clip.mp4",
                "Sunset, Revisited",
                &["ocean".to_string(), "sand".to_string()],
            )
            .unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        let row = contents.lines().nth(1).unwrap();
        assert_eq!(row, "clip.mp4,\"Sunset, Revisited\",\"ocean, sand\"");
    }
}
