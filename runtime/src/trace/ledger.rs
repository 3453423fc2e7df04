//! JSONL ledger of traversal visits, one line per node.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

/// A single visit.
#[derive(Debug, Clone, Serialize)]
pub struct VisitEvent {
    pub timestamp: String,
    pub facility: usize,
    pub node: usize,
    pub parent: Option<usize>,
    pub depth: u32,
    pub lat: f64,
    pub lon: f64,
    pub detections: usize,
    pub chip: Option<String>,
    pub status: String,
}

/// Append-only visit log.
pub struct TraceLedger {
    file: File,
}

impl TraceLedger {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open trace ledger: {}", path.display()))?;
        Ok(Self { file })
    }

    pub fn record(&mut self, event: &VisitEvent) -> Result<()> {
        let json = serde_json::to_string(event)?;
        writeln!(self.file, "{json}")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_appends_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.jsonl");
        let mut ledger = TraceLedger::open(&path).unwrap();
        for node in 0..2 {
            ledger
                .record(&VisitEvent {
                    timestamp: "2026-01-01T00:00:00Z".into(),
                    facility: 3,
                    node,
                    parent: node.checked_sub(1),
                    depth: node as u32,
                    lat: 31.5,
                    lon: -110.3,
                    detections: 1,
                    chip: None,
                    status: "expanded".into(),
                })
                .unwrap();
        }
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> =
            text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["parent"], 0);
        assert!(lines[0]["parent"].is_null());
    }
}
