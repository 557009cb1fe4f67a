use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use tracing::{debug, info, warn};

/// Identifiers captured by a previous run or earlier in this one.
/// Nothing is ever removed during a run.
#[derive(Debug, Default)]
pub struct KnownIdSet {
    ids: HashSet<String>,
}

impl KnownIdSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from a previous run's JSON-lines output, reading the identifier
    /// under `id_field` of each line. A missing or unreadable file means no
    /// prior state; corrupt lines are skipped.
    pub fn load(path: &Path, id_field: &str) -> Self {
        let mut known = Self::new();
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No previous output, starting fresh");
                return known;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cannot open previous output, starting fresh");
                return known;
            }
        };

        info!(path = %path.display(), "Found previous output");
        let mut skipped = 0usize;
        for (lineno, line) in BufReader::new(file).lines().enumerate() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Stopped reading previous output");
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<serde_json::Value>(&line)
                .ok()
                .and_then(|value| id_of(&value, id_field))
            {
                Some(id) => {
                    known.ids.insert(id);
                }
                None => {
                    skipped += 1;
                    debug!(line = lineno + 1, "skipping unreadable resumption line");
                }
            }
        }

        info!(loaded = known.len(), skipped, "Loaded previously captured ids");
        known
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Returns `false` when the id was already present.
    pub fn insert(&mut self, id: &str) -> bool {
        if self.ids.contains(id) {
            return false;
        }
        self.ids.insert(id.to_string())
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Identifiers arrive as strings from the directory and as numbers from the
/// host registry.
pub fn id_of(value: &serde_json::Value, field: &str) -> Option<String> {
    match &value[field] {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// A newly discovered location waiting for its detail fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDetail {
    pub uuid: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Offer {
    Accepted(PendingDetail),
    Duplicate,
}

/// Gatekeeper between search pages and detail fetches.
#[derive(Debug)]
pub struct Collector {
    known: KnownIdSet,
}

impl Collector {
    pub fn new(known: KnownIdSet) -> Self {
        Self { known }
    }

    /// Accept an identifier the first time it is seen, across this run and
    /// the resumption state.
    pub fn offer(&mut self, uuid: &str, created_at: &str) -> Offer {
        if self.known.insert(uuid) {
            Offer::Accepted(PendingDetail {
                uuid: uuid.to_string(),
                created_at: created_at.to_string(),
            })
        } else {
            Offer::Duplicate
        }
    }

    pub fn known(&self) -> &KnownIdSet {
        &self.known
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_offer_accepts_once() {
        let mut collector = Collector::new(KnownIdSet::new());
        assert_eq!(
            collector.offer("u-1", "2022-01-01"),
            Offer::Accepted(PendingDetail {
                uuid: "u-1".to_string(),
                created_at: "2022-01-01".to_string(),
            })
        );
        assert_eq!(collector.offer("u-1", "2022-01-01"), Offer::Duplicate);
        assert_eq!(collector.known().len(), 1);
    }

    #[test]
    fn test_resumed_id_is_duplicate() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"uuid": "abc-123", "date_created": "2021-01-01"}}"#).unwrap();
        writeln!(file, r#"{{"uuid": "def-456", "date_created": "2021-01-02"}}"#).unwrap();

        let known = KnownIdSet::load(file.path(), "uuid");
        assert_eq!(known.len(), 2);

        let mut collector = Collector::new(known);
        assert_eq!(collector.offer("abc-123", "2021-01-01"), Offer::Duplicate);
        assert!(matches!(collector.offer("ghi-789", "2021-01-03"), Offer::Accepted(_)));
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let known = KnownIdSet::load(&dir.path().join("nothing.jl"), "uuid");
        assert!(known.is_empty());
    }

    #[test]
    fn test_load_skips_corrupt_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"uuid": "ok-1"}}"#).unwrap();
        writeln!(file, "{{not json").unwrap();
        writeln!(file).unwrap();
        writeln!(file, r#"{{"name": "no id"}}"#).unwrap();
        write!(file, r#"{{"uuid": "ok-2"}}"#).unwrap();

        let known = KnownIdSet::load(file.path(), "uuid");
        assert_eq!(known.len(), 2);
        assert!(known.contains("ok-1"));
        assert!(known.contains("ok-2"));
    }

    #[test]
    fn test_numeric_ids() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"id": 42, "name": "host"}}"#).unwrap();
        let known = KnownIdSet::load(file.path(), "id");
        assert!(known.contains("42"));
    }
}
