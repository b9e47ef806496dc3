//! Write a default configuration file

use anyhow::Result;
use std::path::Path;
use tracing::info;

use atr_dca::Config;

pub fn run(output: String, force: bool) -> Result<()> {
    let path = Path::new(&output);
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", output);
    }

    Config::default().save(path)?;
    info!("Wrote default configuration to {}", output);
    info!("Set UPBIT_ACCESS_KEY / UPBIT_SECRET_KEY (and optionally DISCORD_WEBHOOK_URL) in .env before --live runs");
    Ok(())
}
