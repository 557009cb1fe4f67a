use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

/// Downstream consumer of shaped records. Each record is emitted exactly once.
pub trait RecordSink<T> {
    fn emit(&mut self, record: &T) -> Result<()>;
}

impl<T: Clone> RecordSink<T> for Vec<T> {
    fn emit(&mut self, record: &T) -> Result<()> {
        self.push(record.clone());
        Ok(())
    }
}

/// Appends one JSON object per line. The file doubles as the next run's
/// resumption state, so it is opened in append mode and flushed per record.
pub struct JsonLinesSink {
    path: PathBuf,
    writer: BufWriter<File>,
    written: usize,
}

impl JsonLinesSink {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            written: 0,
        })
    }

    pub fn written(&self) -> usize {
        self.written
    }
}

impl<T: Serialize> RecordSink<T> for JsonLinesSink {
    fn emit(&mut self, record: &T) -> Result<()> {
        serde_json::to_writer(&mut self.writer, record).context("serialize record")?;
        self.writer.write_all(b"\n")?;
        self.writer
            .flush()
            .with_context(|| format!("Failed to flush {}", self.path.display()))?;
        self.written += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_appends_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("locations.jl");

        let mut sink = JsonLinesSink::open(&path).unwrap();
        sink.emit(&json!({"uuid": "a"})).unwrap();
        assert_eq!(sink.written(), 1);
        drop(sink);

        let mut sink = JsonLinesSink::open(&path).unwrap();
        sink.emit(&json!({"uuid": "b"})).unwrap();
        drop(sink);

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "{\"uuid\":\"a\"}\n{\"uuid\":\"b\"}\n");
    }
}
