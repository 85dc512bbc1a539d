//! Pipeline configuration: the deployed defaults, overridable by a TOML file
//! and `TAXI_ETL_` environment variables.

use std::path::Path;

use figment::{
  providers::{Env, Format, Serialized, Toml},
  Figment,
};
use serde::{Deserialize, Serialize};

use crate::catalog::LayoutPolicy;
use crate::error::EtlError;
use crate::selector::IndexPolicy;

pub const LISTING_PAGE_URL: &str = "https://www.nyc.gov/site/tlc/about/tlc-trip-record-data.page";
pub const ZONE_LOOKUP_URL: &str = "https://d37ci6vzurychx.cloudfront.net/misc/taxi+_zone_lookup.csv";
pub const PROGRESS_BUCKET: &str = "ny_taxi_trip_de-learning-391102";
pub const PROGRESS_BLOB: &str = "run_times.txt";
pub const STAGING_PREFIX: &str = "taxi_trip_data";
pub const GCS_ENDPOINT: &str = "https://storage.googleapis.com";
pub const DATAPROC_PROJECT: &str = "de-learning-391102";
pub const DATAPROC_REGION: &str = "asia-southeast1";
pub const DATAPROC_CLUSTER: &str = "de-learning-cluster";
pub const PYSPARK_JOB_URI: &str =
  "gs://ny_taxi_trip_de-learning-391102/pyspark_transforming_jobs/pyspark_dataproc_job.py";
pub const BIGQUERY_CONNECTOR_JAR: &str =
  "gs://spark-lib/bigquery/spark-bigquery-with-dependencies_2.12-0.32.0.jar";
pub const USER_AGENT: &str = "taxi-etl (https://www.nyc.gov/site/tlc/about/tlc-trip-record-data.page)";
pub const DEFAULT_CONFIG_FILEPATH: &str = "taxi_etl.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  pub user_agent: String,
  /// Cloud Storage JSON API root, shared by the progress and staging buckets.
  pub gcs_endpoint: String,
  /// OAuth bearer token for GCS and Dataproc; anonymous requests when unset.
  pub access_token: Option<String>,
  pub listing: ListingConfig,
  pub progress: ProgressConfig,
  pub staging: StagingConfig,
  pub transform: TransformConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListingConfig {
  pub url: String,
  pub layout_policy: LayoutPolicy,
  pub timeout_secs: u64,
}

/// Where the run counter lives. Exactly one of `bucket` / `local_dir` is used,
/// `local_dir` wins when both are set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressConfig {
  pub bucket: String,
  pub local_dir: Option<String>,
  pub blob_name: String,
  pub index_policy: IndexPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StagingConfig {
  pub bucket: String,
  pub local_dir: Option<String>,
  pub prefix: String,
  pub zone_lookup_url: String,
  pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
  pub endpoint: Option<String>,
  pub project_id: String,
  pub region: String,
  pub cluster: String,
  pub main_python_file_uri: String,
  pub jar_file_uris: Vec<String>,
  pub poll_interval_secs: u64,
  pub max_polls: u32,
}

impl Default for Config {
  fn default() -> Self {
    Config {
      user_agent: USER_AGENT.to_string(),
      gcs_endpoint: GCS_ENDPOINT.to_string(),
      access_token: None,
      listing: ListingConfig::default(),
      progress: ProgressConfig::default(),
      staging: StagingConfig::default(),
      transform: TransformConfig::default(),
    }
  }
}

impl Default for ListingConfig {
  fn default() -> Self {
    ListingConfig {
      url: LISTING_PAGE_URL.to_string(),
      layout_policy: LayoutPolicy::default(),
      timeout_secs: 60,
    }
  }
}

impl Default for ProgressConfig {
  fn default() -> Self {
    ProgressConfig {
      bucket: PROGRESS_BUCKET.to_string(),
      local_dir: None,
      blob_name: PROGRESS_BLOB.to_string(),
      index_policy: IndexPolicy::default(),
    }
  }
}

impl Default for StagingConfig {
  fn default() -> Self {
    StagingConfig {
      bucket: PROGRESS_BUCKET.to_string(),
      local_dir: None,
      prefix: STAGING_PREFIX.to_string(),
      zone_lookup_url: ZONE_LOOKUP_URL.to_string(),
      timeout_secs: 600,
    }
  }
}

impl Default for TransformConfig {
  fn default() -> Self {
    TransformConfig {
      endpoint: None,
      project_id: DATAPROC_PROJECT.to_string(),
      region: DATAPROC_REGION.to_string(),
      cluster: DATAPROC_CLUSTER.to_string(),
      main_python_file_uri: PYSPARK_JOB_URI.to_string(),
      jar_file_uris: vec![BIGQUERY_CONNECTOR_JAR.to_string()],
      poll_interval_secs: 10,
      max_polls: 360,
    }
  }
}

impl TransformConfig {
  /// The regional Dataproc endpoint unless one is configured explicitly.
  pub fn endpoint(&self) -> String {
    self
      .endpoint
      .clone()
      .unwrap_or_else(|| format!("https://{}-dataproc.googleapis.com", self.region))
  }
}

/// Defaults, then the TOML file at `path` if it exists, then `TAXI_ETL_*` env vars
/// (`__` separates sections, e.g. `TAXI_ETL_PROGRESS__LOCAL_DIR`).
pub fn load_config(path: &Path) -> Result<Config, EtlError> {
  Figment::from(Serialized::defaults(Config::default()))
    .merge(Toml::file(path))
    .merge(Env::prefixed("TAXI_ETL_").split("__"))
    .extract()
    .map_err(|e| EtlError::Config(e.to_string()))
}

/// Defaults overridden by a TOML string, without consulting the environment.
pub fn load_config_from_str(toml_str: &str) -> Result<Config, EtlError> {
  Figment::from(Serialized::defaults(Config::default()))
    .merge(Toml::string(toml_str))
    .extract()
    .map_err(|e| EtlError::Config(e.to_string()))
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;
  use tempfile::NamedTempFile;

  #[test]
  fn test_defaults_match_deployment() {
    let config = load_config_from_str("").unwrap();
    assert_eq!(config, Config::default());
    assert_eq!(config.progress.blob_name, "run_times.txt");
    assert_eq!(config.progress.index_policy, IndexPolicy::Doubled);
    assert_eq!(config.listing.layout_policy, LayoutPolicy::Strict);
    assert_eq!(
      config.transform.endpoint(),
      "https://asia-southeast1-dataproc.googleapis.com"
    );
  }

  #[test]
  fn test_partial_override() {
    let config = load_config_from_str(
      r#"
[progress]
local_dir = "/tmp/taxi"
index_policy = "single"

[listing]
layout_policy = "lenient"
"#,
    )
    .unwrap();
    assert_eq!(config.progress.local_dir.as_deref(), Some("/tmp/taxi"));
    assert_eq!(config.progress.index_policy, IndexPolicy::Single);
    assert_eq!(config.progress.blob_name, PROGRESS_BLOB);
    assert_eq!(config.listing.layout_policy, LayoutPolicy::Lenient);
  }

  #[test]
  fn test_gcs_endpoint_is_top_level() {
    let config = load_config_from_str(
      r#"
gcs_endpoint = "http://127.0.0.1:4443"

[staging]
prefix = "raw"
"#,
    )
    .unwrap();
    assert_eq!(config.gcs_endpoint, "http://127.0.0.1:4443");
    assert_eq!(config.staging.prefix, "raw");
    assert_eq!(config.progress.bucket, PROGRESS_BUCKET);
    assert_eq!(Config::default().gcs_endpoint, GCS_ENDPOINT);
  }

  #[test]
  fn test_unknown_policy_rejected() {
    let result = load_config_from_str("[progress]\nindex_policy = \"triple\"\n");
    assert!(matches!(result, Err(EtlError::Config(_))));
  }

  #[test]
  fn test_missing_file_falls_back_to_defaults() {
    let config = load_config(Path::new("/nonexistent/taxi_etl.toml")).unwrap();
    assert_eq!(config.listing.url, LISTING_PAGE_URL);
  }

  #[test]
  fn test_load_from_file() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(
      temp_file,
      r#"
[transform]
cluster = "other-cluster"
max_polls = 3
"#
    )
    .unwrap();
    let config = load_config(temp_file.path()).unwrap();
    assert_eq!(config.transform.cluster, "other-cluster");
    assert_eq!(config.transform.max_polls, 3);
    assert_eq!(config.transform.region, DATAPROC_REGION);
  }
}
