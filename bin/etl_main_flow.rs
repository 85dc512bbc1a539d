/// One scheduled run of the pipeline: pick up the next month(s) of trip
/// records, stage them and run the cleaning job over them.
/// Runs must be serialized by the scheduler, the run counter has no locking.
use std::env;
use std::error::Error;
use std::path::PathBuf;

use taxi_etl::config::{load_config, DEFAULT_CONFIG_FILEPATH};
use taxi_etl::flow::run_from_config;

fn main() -> Result<(), Box<dyn Error>> {
  env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
  let config_path = env::args()
    .nth(1)
    .map(PathBuf::from)
    .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILEPATH));
  let config = load_config(&config_path)?;

  let report = match run_from_config(&config) {
    Ok(report) => report,
    Err(e) if e.is_layout_change() => {
      eprintln!("-- the listing page layout changed, no months were selected: {}", e);
      return Err(e.into());
    }
    Err(e) => return Err(e.into()),
  };
  println!("{}", serde_json::to_string_pretty(&report)?);
  Ok(())
}
