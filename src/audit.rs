//! Append-only ATR audit log
//!
//! One CSV row per ticker evaluation: `timestamp,ticker,atr,atr_percent`.
//! The header is written once, when the file is created or empty.

use anyhow::{Context, Result};
use chrono::Local;
use serde::Serialize;
use std::fs::OpenOptions;
use std::path::PathBuf;

use crate::indicators::AtrReading;

#[derive(Debug, Serialize)]
struct AtrRow<'a> {
    timestamp: String,
    ticker: &'a str,
    atr: f64,
    atr_percent: f64,
}

#[derive(Debug, Clone)]
pub struct AtrAuditLog {
    path: PathBuf,
}

impl AtrAuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        AtrAuditLog { path: path.into() }
    }

    pub fn append(&self, reading: &AtrReading) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open audit log {}", self.path.display()))?;
        let needs_header = file.metadata()?.len() == 0;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(needs_header)
            .from_writer(file);

        writer.serialize(AtrRow {
            timestamp: reading
                .computed_at
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
            ticker: reading.ticker.as_str(),
            atr: reading.value,
            atr_percent: reading.percent,
        })?;
        writer.flush()?;
        Ok(())
    }
}
