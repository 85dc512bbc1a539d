//! Submits the PySpark cleaning job that appends staged files to the
//! partitioned trip tables, and waits for it to finish.

use std::thread;
use std::time::Duration;

use lazy_static::lazy_static;
use regex::Regex;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::TransformConfig;
use crate::error::EtlError;
use crate::storage::{BlobStore, GcsBlobStore};

lazy_static! {
  static ref GS_URI_REGEX: Regex = Regex::new("^gs://(.*?)/(.*)$").unwrap();
}

/// Suffix of the first chunk Dataproc writes driver output to.
const DRIVER_OUTPUT_CHUNK: &str = ".000000000";

/// What came back from a finished transform job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformOutcome {
  pub job_id: String,
  pub state: String,
  pub driver_output_uri: Option<String>,
}

/// Runs the cleaning transform over a set of staged files.
pub trait TransformSubmitter {
  fn submit(&self, staged_uris: &[String]) -> Result<TransformOutcome, EtlError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Job {
  reference: JobReference,
  status: Option<JobStatus>,
  driver_output_resource_uri: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
  job_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStatus {
  state: String,
  details: Option<String>,
}

/// The Dataproc jobs REST API.
pub struct DataprocSubmitter {
  client: Client,
  config: TransformConfig,
  token: Option<String>,
  driver_output_endpoint: Option<String>,
}

impl DataprocSubmitter {
  pub fn new(client: Client, config: TransformConfig, token: Option<String>) -> Self {
    DataprocSubmitter {
      client,
      config,
      token,
      driver_output_endpoint: None,
    }
  }

  /// Also read back the driver's output from GCS once the job is done.
  pub fn with_driver_output(mut self, gcs_endpoint: &str) -> Self {
    self.driver_output_endpoint = Some(gcs_endpoint.to_string());
    self
  }

  fn jobs_url(&self) -> String {
    format!(
      "{}/v1/projects/{}/regions/{}/jobs",
      self.config.endpoint().trim_end_matches('/'),
      self.config.project_id,
      self.config.region
    )
  }

  fn send(&self, request: reqwest::blocking::RequestBuilder) -> Result<Job, EtlError> {
    let request = match &self.token {
      Some(token) => request.bearer_auth(token),
      None => request,
    };
    let resp = request.send().map_err(|e| EtlError::Transform(e.to_string()))?;
    let status = resp.status();
    if !status.is_success() {
      let body = resp.text().unwrap_or_default();
      return Err(EtlError::Transform(format!("Dataproc answered {}: {}", status, body)));
    }
    resp.json::<Job>().map_err(|e| EtlError::Transform(e.to_string()))
  }

  fn read_driver_output(&self, driver_output_uri: &str) -> Option<String> {
    let endpoint = self.driver_output_endpoint.as_deref()?;
    let cap = GS_URI_REGEX.captures(driver_output_uri)?;
    let bucket = cap.get(1)?.as_str();
    let name = format!("{}{}", cap.get(2)?.as_str(), DRIVER_OUTPUT_CHUNK);
    let store = GcsBlobStore::new(self.client.clone(), endpoint, bucket, self.token.clone());
    match store.get(&name) {
      Ok(Some(bytes)) => Some(String::from_utf8_lossy(&bytes).into_owned()),
      Ok(None) => None,
      Err(e) => {
        log::warn!("could not read driver output {}: {}", driver_output_uri, e);
        None
      }
    }
  }
}

impl TransformSubmitter for DataprocSubmitter {
  fn submit(&self, staged_uris: &[String]) -> Result<TransformOutcome, EtlError> {
    if staged_uris.is_empty() {
      return Err(EtlError::Transform("no staged files to transform".to_string()));
    }
    let body = job_request(&self.config, staged_uris);
    let submitted = self.send(self.client.post(format!("{}:submit", self.jobs_url())).json(&body))?;
    let job_id = submitted.reference.job_id;
    log::info!("submitted Dataproc job {} over {} file(s)", job_id, staged_uris.len());

    let job_url = format!("{}/{}", self.jobs_url(), job_id);
    for _poll in 0..self.config.max_polls {
      let job = self.send(self.client.get(&job_url))?;
      let status = job.status.unwrap_or(JobStatus {
        state: "STATE_UNSPECIFIED".to_string(),
        details: None,
      });
      match status.state.as_str() {
        "DONE" => {
          if let Some(uri) = &job.driver_output_resource_uri {
            if let Some(output) = self.read_driver_output(uri) {
              log::info!("job {} finished successfully: {}", job_id, output.trim());
            }
          }
          return Ok(TransformOutcome {
            job_id,
            state: status.state,
            driver_output_uri: job.driver_output_resource_uri,
          });
        }
        "ERROR" | "CANCELLED" => {
          return Err(EtlError::Transform(format!(
            "job {} ended in state {}: {}",
            job_id,
            status.state,
            status.details.unwrap_or_default()
          )));
        }
        other => log::debug!("job {} is {}", job_id, other),
      }
      thread::sleep(Duration::from_secs(self.config.poll_interval_secs));
    }
    Err(EtlError::Transform(format!(
      "job {} still running after {} polls",
      job_id, self.config.max_polls
    )))
  }
}

/// Body of a `jobs:submit` call: the PySpark job receives all staged URIs as
/// one comma-separated argument.
pub fn job_request(config: &TransformConfig, staged_uris: &[String]) -> Value {
  json!({
    "projectId": config.project_id,
    "job": {
      "placement": { "clusterName": config.cluster },
      "pysparkJob": {
        "mainPythonFileUri": config.main_python_file_uri,
        "args": [staged_uris.join(",")],
        "jarFileUris": config.jar_file_uris,
      }
    }
  })
}
