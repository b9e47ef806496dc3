// State Manager for Live Trading
// Flat JSON persistence of per-ticker reference prices
//
// The file is a single object mapping ticker -> last buy price (or null),
// rewritten in full after every change so a restart resumes from the same
// add-on reference point.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::types::Ticker;

/// Ticker -> reference price. `None` means no open reference.
pub type ReferencePrices = BTreeMap<Ticker, Option<f64>>;

/// Read every entry stored in `path`.
///
/// A missing, unreadable or malformed file yields an empty map instead of an
/// error. Non-positive or non-finite prices read as `None`.
pub fn load_all_reference_prices(path: &Path) -> ReferencePrices {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("No reference price file at {}, starting fresh", path.display());
            return ReferencePrices::new();
        }
        Err(e) => {
            warn!("Failed to read {}: {}, starting fresh", path.display(), e);
            return ReferencePrices::new();
        }
    };

    let stored: ReferencePrices = match serde_json::from_str(&contents) {
        Ok(s) => s,
        Err(e) => {
            warn!("Malformed reference price file {}: {}, starting fresh", path.display(), e);
            return ReferencePrices::new();
        }
    };

    debug!("Loaded {} reference prices from {}", stored.len(), path.display());
    stored
        .into_iter()
        .map(|(ticker, price)| (ticker, price.filter(|p| p.is_finite() && *p > 0.0)))
        .collect()
}

/// Read the reference prices for `tickers` from `path`.
///
/// Every requested ticker is present in the result; tickers missing from the
/// file default to `None`, and tickers in the file that were not requested are
/// left out. A missing, unreadable or malformed file yields the all-`None`
/// default instead of an error.
pub fn load_reference_prices(path: &Path, tickers: &[Ticker]) -> ReferencePrices {
    let stored = load_all_reference_prices(path);
    tickers
        .iter()
        .map(|t| (t.clone(), stored.get(t).copied().flatten()))
        .collect()
}

/// Overwrite `path` with `prices`.
///
/// Writes to a sibling temp file and renames it over the target so a crash
/// mid-write leaves either the old or the new contents.
pub fn save_reference_prices(path: &Path, prices: &ReferencePrices) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create state directory {}", parent.display()))?;
    }

    let json = serde_json::to_string_pretty(prices)?;
    let tmp_path = tmp_path_for(path);
    std::fs::write(&tmp_path, json)
        .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
    std::fs::rename(&tmp_path, path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;

    debug!("Reference prices saved to {}", path.display());
    Ok(())
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "reference_prices.json".into());
    name.push(".tmp");
    path.with_file_name(name)
}

/// In-memory reference prices backed by a JSON file.
///
/// Mutations mark the store dirty; `save` clears the flag only on success so
/// a failed write is retried by the next `save` call. Entries in the file for
/// tickers outside the configured set are carried through every save
/// untouched.
#[derive(Debug)]
pub struct ReferencePriceStore {
    path: PathBuf,
    prices: ReferencePrices,
    retained: ReferencePrices,
    dirty: bool,
}

impl ReferencePriceStore {
    pub fn open(path: impl Into<PathBuf>, tickers: &[Ticker]) -> Self {
        let path = path.into();
        let mut retained = load_all_reference_prices(&path);
        let prices: ReferencePrices = tickers
            .iter()
            .map(|t| (t.clone(), retained.remove(t).flatten()))
            .collect();
        let held = prices.values().filter(|p| p.is_some()).count();
        info!(
            "Reference price store: {} ({} of {} tickers with a reference)",
            path.display(),
            held,
            prices.len()
        );
        if !retained.is_empty() {
            debug!("Keeping {} unconfigured tickers in {}", retained.len(), path.display());
        }
        ReferencePriceStore {
            path,
            prices,
            retained,
            dirty: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, ticker: &Ticker) -> Option<f64> {
        self.prices.get(ticker).copied().flatten()
    }

    pub fn set(&mut self, ticker: &Ticker, price: Option<f64>) {
        let previous = self.prices.insert(ticker.clone(), price);
        if previous != Some(price) {
            self.dirty = true;
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn save(&mut self) -> Result<()> {
        let mut all = self.retained.clone();
        all.extend(self.prices.iter().map(|(t, p)| (t.clone(), *p)));
        save_reference_prices(&self.path, &all)?;
        self.dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TempFile(PathBuf);

    impl TempFile {
        fn new(name: &str) -> Self {
            let path = std::env::temp_dir().join(format!(
                "atr_dca_state_{}_{}_{}.json",
                name,
                std::process::id(),
                uuid::Uuid::new_v4()
            ));
            TempFile(path)
        }
    }

    impl Drop for TempFile {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.0);
        }
    }

    fn tickers(names: &[&str]) -> Vec<Ticker> {
        names.iter().map(Ticker::new).collect()
    }

    #[test]
    fn test_missing_file_defaults_to_none() {
        let f = TempFile::new("missing");
        let prices = load_reference_prices(&f.0, &tickers(&["KRW-BTC", "KRW-ETH"]));
        assert_eq!(prices.len(), 2);
        assert!(prices.values().all(|p| p.is_none()));
    }

    #[test]
    fn test_malformed_file_defaults_to_none() {
        let f = TempFile::new("malformed");
        std::fs::write(&f.0, "{not json").unwrap();
        let prices = load_reference_prices(&f.0, &tickers(&["KRW-BTC"]));
        assert_eq!(prices.get(&Ticker::new("KRW-BTC")), Some(&None));
    }

    #[test]
    fn test_roundtrip_restricted_to_requested_tickers() {
        let f = TempFile::new("roundtrip");
        let mut state = ReferencePrices::new();
        state.insert(Ticker::new("KRW-BTC"), Some(95_000_000.0));
        state.insert(Ticker::new("KRW-ETH"), None);
        state.insert(Ticker::new("KRW-XLM"), Some(412.5));
        save_reference_prices(&f.0, &state).unwrap();

        let loaded = load_reference_prices(&f.0, &tickers(&["KRW-BTC", "KRW-XLM", "KRW-SUI"]));
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded[&Ticker::new("KRW-BTC")], Some(95_000_000.0));
        assert_eq!(loaded[&Ticker::new("KRW-XLM")], Some(412.5));
        assert_eq!(loaded[&Ticker::new("KRW-SUI")], None);
        assert!(!loaded.contains_key(&Ticker::new("KRW-ETH")));
    }

    #[test]
    fn test_reads_legacy_layout() {
        // legacy layout: {"KRW-ONDO": 1234.0, "KRW-XLM": null}
        let f = TempFile::new("legacy");
        std::fs::write(&f.0, r#"{"KRW-ONDO": 1234.0, "krw-xlm": null}"#).unwrap();
        let loaded = load_reference_prices(&f.0, &tickers(&["KRW-ONDO", "KRW-XLM"]));
        assert_eq!(loaded[&Ticker::new("KRW-ONDO")], Some(1234.0));
        assert_eq!(loaded[&Ticker::new("KRW-XLM")], None);
    }

    #[test]
    fn test_non_positive_values_are_ignored() {
        let f = TempFile::new("nonpositive");
        std::fs::write(&f.0, r#"{"KRW-BTC": 0.0, "KRW-ETH": -5.0}"#).unwrap();
        let loaded = load_reference_prices(&f.0, &tickers(&["KRW-BTC", "KRW-ETH"]));
        assert!(loaded.values().all(|p| p.is_none()));
    }

    #[test]
    fn test_store_tracks_dirty_and_persists() {
        let f = TempFile::new("store");
        let t = Ticker::new("KRW-BTC");
        let mut store = ReferencePriceStore::open(&f.0, &[t.clone()]);
        assert!(!store.is_dirty());

        store.set(&t, Some(100.0));
        assert!(store.is_dirty());
        store.save().unwrap();
        assert!(!store.is_dirty());

        // same value again is not a change
        store.set(&t, Some(100.0));
        assert!(!store.is_dirty());

        let reopened = ReferencePriceStore::open(&f.0, &[t.clone()]);
        assert_eq!(reopened.get(&t), Some(100.0));
    }

    #[test]
    fn test_save_keeps_unconfigured_tickers() {
        let f = TempFile::new("retained");
        std::fs::write(&f.0, r#"{"KRW-BTC": 100.0, "KRW-XLM": 412.5}"#).unwrap();
        let btc = Ticker::new("KRW-BTC");
        let xlm = Ticker::new("KRW-XLM");

        let mut store = ReferencePriceStore::open(&f.0, &[btc.clone()]);
        assert_eq!(store.get(&xlm), None);
        store.set(&btc, Some(99.0));
        store.save().unwrap();

        let all = load_all_reference_prices(&f.0);
        assert_eq!(all.len(), 2);
        assert_eq!(all[&btc], Some(99.0));
        assert_eq!(all[&xlm], Some(412.5));

        // re-added ticker resumes its old reference
        let store = ReferencePriceStore::open(&f.0, &[btc.clone(), xlm.clone()]);
        assert_eq!(store.get(&xlm), Some(412.5));
        assert_eq!(store.get(&btc), Some(99.0));
    }

    #[test]
    fn test_failed_save_stays_dirty() {
        let dir = std::env::temp_dir().join(format!("atr_dca_dir_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        // target path is an existing directory, so the rename fails
        let t = Ticker::new("KRW-BTC");
        let mut store = ReferencePriceStore::open(&dir, &[t.clone()]);
        store.set(&t, Some(1.0));
        assert!(store.save().is_err());
        assert!(store.is_dirty());
        let _ = std::fs::remove_dir_all(&dir);
        let _ = std::fs::remove_file(tmp_path_for(&dir));
    }
}
