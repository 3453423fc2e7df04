//! Per-facility output directory: annotated chips and the visit ledger.

use super::ledger::{TraceLedger, VisitEvent};
use anyhow::{Context, Result};
use image::{ImageFormat, RgbImage};
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Writes `{n}.png` files, `n` being the smallest integer not yet taken.
#[derive(Debug, Clone)]
pub struct ChipWriter {
    dir: PathBuf,
}

impl ChipWriter {
    pub fn create(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create output dir: {}", dir.display()))?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Smallest `n` for which `{n}.png` does not exist.
    pub fn next_index(&self) -> u64 {
        (0u64..)
            .find(|n| !self.dir.join(format!("{n}.png")).exists())
            .unwrap_or(u64::MAX)
    }

    /// Claim the next free name and encode `image` into it.
    pub fn write(&self, image: &RgbImage) -> Result<PathBuf> {
        let mut n = self.next_index();
        let (path, file) = loop {
            let path = self.dir.join(format!("{n}.png"));
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => break (path, file),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => n += 1,
                Err(e) => {
                    return Err(e).with_context(|| format!("failed to create {}", path.display()))
                }
            }
        };

        let mut writer = BufWriter::new(file);
        let encoded = image
            .write_to(&mut writer, ImageFormat::Png)
            .map_err(anyhow::Error::from)
            .and_then(|()| writer.flush().map_err(anyhow::Error::from));
        drop(writer);
        if let Err(e) = encoded {
            // release the slot so the index is reused
            let _ = std::fs::remove_file(&path);
            return Err(e.context(format!("failed to encode {}", path.display())));
        }
        Ok(path)
    }
}

/// Everything a traversal persists for one facility.
pub struct TraceOutput {
    pub facility: usize,
    pub chips: ChipWriter,
    pub ledger: Option<TraceLedger>,
}

impl TraceOutput {
    /// `<root>/<facility index>/` with chips and a `trace.jsonl` ledger.
    pub fn create(root: &Path, facility: usize) -> Result<Self> {
        let dir = root.join(facility.to_string());
        let chips = ChipWriter::create(&dir)?;
        let ledger = TraceLedger::open(&dir.join("trace.jsonl"))?;
        Ok(Self {
            facility,
            chips,
            ledger: Some(ledger),
        })
    }

    /// Chips only, no ledger.
    pub fn chips_only(dir: &Path, facility: usize) -> Result<Self> {
        Ok(Self {
            facility,
            chips: ChipWriter::create(dir)?,
            ledger: None,
        })
    }

    pub fn record(&mut self, event: &VisitEvent) -> Result<()> {
        match &mut self.ledger {
            Some(ledger) => ledger.record(event),
            None => Ok(()),
        }
    }
}
