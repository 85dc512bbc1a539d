/// Submits the cleaning job for files that are already staged, e.g. to
/// replay a run whose transform step failed.
///
/// usage: submit_transform gs://bucket/a.parquet,gs://bucket/b.parquet [config.toml]
use std::env;
use std::error::Error;
use std::path::PathBuf;

use taxi_etl::config::{load_config, DEFAULT_CONFIG_FILEPATH};
use taxi_etl::flow::Components;
use taxi_etl::transform::TransformSubmitter;

fn main() -> Result<(), Box<dyn Error>> {
  env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
  let mut args = env::args().skip(1);
  let staged_uris: Vec<String> = args
    .next()
    .ok_or("expecting a comma-separated list of staged gs:// URIs")?
    .split(',')
    .map(|uri| uri.trim().to_string())
    .filter(|uri| !uri.is_empty())
    .collect();
  let config_path = args
    .next()
    .map(PathBuf::from)
    .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILEPATH));
  let config = load_config(&config_path)?;

  let components = Components::from_config(&config)?;
  let outcome = components.transform.submit(&staged_uris)?;
  eprintln!("-- job {} finished in state {}", outcome.job_id, outcome.state);
  Ok(())
}
