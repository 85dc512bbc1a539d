/// Builds the link catalog and selects this run's pairs, printing them as JSON.
/// This advances the run counter unless `--dry-run` is given.
use std::env;
use std::error::Error;
use std::path::PathBuf;

use serde_json::json;
use taxi_etl::catalog::build_catalog;
use taxi_etl::config::{load_config, DEFAULT_CONFIG_FILEPATH};
use taxi_etl::flow::{preview, Components, RunSettings};
use taxi_etl::selector::select;

fn main() -> Result<(), Box<dyn Error>> {
  env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
  let mut dry_run = false;
  let mut config_path = PathBuf::from(DEFAULT_CONFIG_FILEPATH);
  for arg in env::args().skip(1) {
    match arg.as_str() {
      "--dry-run" | "-n" => dry_run = true,
      other if other.starts_with('-') => return Err(format!("unknown argument: {}", other).into()),
      path => config_path = PathBuf::from(path),
    }
  }
  let config = load_config(&config_path)?;
  let settings = RunSettings::from_config(&config);
  let components = Components::from_config(&config)?;

  let output = if dry_run {
    let (catalog, selection) = preview(&settings, &components.listing, &components.tracker)?;
    json!({ "dry_run": true, "catalog_size": catalog.len(), "selection": selection })
  } else {
    let catalog = build_catalog(&components.listing, &settings.listing_page_url, settings.layout)?;
    let selection = select(&components.tracker, &catalog, settings.index_policy)?;
    json!({ "dry_run": false, "catalog_size": catalog.len(), "selection": selection })
  };
  println!("{}", serde_json::to_string_pretty(&output)?);
  Ok(())
}
