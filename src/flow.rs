//! One end-to-end run: discover, select, stage, transform.

use std::time::{Duration, Instant};

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use crate::catalog::{build_catalog, HttpListing, LayoutPolicy, LinkCatalog, LinkPair, ListingSource};
use crate::config::Config;
use crate::error::EtlError;
use crate::progress::ProgressTracker;
use crate::selector::{self, IndexPolicy};
use crate::staging::{stage_links, HttpStager, Stager};
use crate::storage::{BlobStore, GcsBlobStore, LocalBlobStore};
use crate::transform::{DataprocSubmitter, TransformOutcome, TransformSubmitter};

/// The knobs of a run that are not collaborators.
#[derive(Debug, Clone)]
pub struct RunSettings {
  pub listing_page_url: String,
  pub zone_lookup_url: String,
  pub layout: LayoutPolicy,
  pub index_policy: IndexPolicy,
}

impl RunSettings {
  pub fn from_config(config: &Config) -> Self {
    RunSettings {
      listing_page_url: config.listing.url.clone(),
      zone_lookup_url: config.staging.zone_lookup_url.clone(),
      layout: config.listing.layout_policy,
      index_policy: config.progress.index_policy,
    }
  }
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
  pub is_first_run: bool,
  pub runs_completed: u64,
  pub links: Vec<LinkPair>,
  /// Zone lookup table, staged on the first run only.
  pub zone_lookup_uri: Option<String>,
  pub staged_uris: Vec<String>,
  pub transform: Option<TransformOutcome>,
}

/// Runs the whole pipeline once. Runs must not overlap.
pub fn run_flow(
  settings: &RunSettings,
  listing: &dyn ListingSource,
  tracker: &ProgressTracker,
  stager: &dyn Stager,
  transform: &dyn TransformSubmitter,
) -> Result<RunReport, EtlError> {
  let start = Instant::now();
  let catalog = build_catalog(listing, &settings.listing_page_url, settings.layout)?;
  let selection = selector::select(tracker, &catalog, settings.index_policy)?;

  let mut report = RunReport {
    is_first_run: selection.is_first_run,
    runs_completed: selection.runs_completed,
    links: selection.links,
    zone_lookup_uri: None,
    staged_uris: Vec::new(),
    transform: None,
  };
  if report.links.is_empty() {
    log::info!("there is no available link to extract");
    return Ok(report);
  }

  if report.is_first_run {
    report.zone_lookup_uri = Some(stager.stage(&settings.zone_lookup_url)?);
  }
  report.staged_uris = stage_links(stager, &report.links)?;
  report.transform = Some(transform.submit(&report.staged_uris)?);

  log::info!(
    "run {} finished: {} file(s) staged and transformed in {} sec.",
    report.runs_completed,
    report.staged_uris.len(),
    start.elapsed().as_secs()
  );
  Ok(report)
}

/// The catalog and the selection the next run would make, persisting nothing.
pub fn preview(
  settings: &RunSettings,
  listing: &dyn ListingSource,
  tracker: &ProgressTracker,
) -> Result<(LinkCatalog, selector::SelectionResult), EtlError> {
  let catalog = build_catalog(listing, &settings.listing_page_url, settings.layout)?;
  let progress = tracker.peek()?;
  let links = selector::plan(&catalog, progress.count, settings.index_policy);
  let selection = selector::SelectionResult {
    links,
    is_first_run: !progress.exists,
    runs_completed: progress.count.saturating_add(1),
  };
  Ok((catalog, selection))
}

/// The production collaborators, wired from configuration.
pub struct Components {
  pub listing: HttpListing,
  pub tracker: ProgressTracker,
  pub stager: HttpStager,
  pub transform: DataprocSubmitter,
}

impl Components {
  pub fn from_config(config: &Config) -> Result<Self, EtlError> {
    let listing = HttpListing::new(http_client(&config.user_agent, config.listing.timeout_secs)?);
    let client = http_client(&config.user_agent, config.staging.timeout_secs)?;

    let progress_store = blob_store(
      &client,
      config,
      config.progress.local_dir.as_deref(),
      &config.progress.bucket,
    );
    let staging_store = blob_store(
      &client,
      config,
      config.staging.local_dir.as_deref(),
      &config.staging.bucket,
    );

    Ok(Components {
      listing,
      tracker: ProgressTracker::new(progress_store, &config.progress.blob_name),
      stager: HttpStager::new(client.clone(), staging_store, &config.staging.prefix),
      transform: DataprocSubmitter::new(client, config.transform.clone(), config.access_token.clone())
        .with_driver_output(&config.gcs_endpoint),
    })
  }
}

pub fn http_client(user_agent: &str, timeout_secs: u64) -> Result<Client, EtlError> {
  Client::builder()
    .user_agent(user_agent)
    .timeout(Duration::from_secs(timeout_secs))
    .build()
    .map_err(|e| EtlError::Config(format!("cannot build HTTP client: {}", e)))
}

fn blob_store(client: &Client, config: &Config, local_dir: Option<&str>, bucket: &str) -> Box<dyn BlobStore> {
  match local_dir {
    Some(dir) => Box::new(LocalBlobStore::new(dir)),
    None => Box::new(GcsBlobStore::new(
      client.clone(),
      &config.gcs_endpoint,
      bucket,
      config.access_token.clone(),
    )),
  }
}

/// Builds the production components from `config` and runs once.
pub fn run_from_config(config: &Config) -> Result<RunReport, EtlError> {
  let components = Components::from_config(config)?;
  run_flow(
    &RunSettings::from_config(config),
    &components.listing,
    &components.tracker,
    &components.stager,
    &components.transform,
  )
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_progress_store_uses_shared_gcs_endpoint() {
    let mut server = mockito::Server::new();
    let counter = server
      .mock("GET", "/storage/v1/b/progress-bucket/o/run_times.txt")
      .match_query(mockito::Matcher::Any)
      .with_status(200)
      .with_body("run times: 5")
      .expect(1)
      .create();
    let mut config = Config::default();
    config.gcs_endpoint = server.url();
    config.progress.bucket = "progress-bucket".to_string();

    let components = Components::from_config(&config).unwrap();
    let progress = components.tracker.peek().unwrap();
    assert_eq!(progress.count, 5);
    assert!(progress.exists);
    counter.assert();
  }
}
