//! Shared HTTP request helpers for CLI commands.

use anyhow::{Context, Result};
use serde::Deserialize;

pub async fn get_json<T: for<'de> Deserialize<'de>>(url: &str) -> Result<T> {
    reqwest::get(url)
        .await
        .with_context(|| format!("failed to connect to courierd at {} (is it running?)", url))?
        .error_for_status()
        .with_context(|| format!("courierd rejected {}", url))?
        .json::<T>()
        .await
        .context("failed to parse response")
}
