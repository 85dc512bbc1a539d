//! Downloads dataset files and re-uploads them into the staging bucket.

use std::thread;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use reqwest::blocking::Client;

use crate::catalog::LinkPair;
use crate::error::EtlError;
use crate::storage::BlobStore;

const DOWNLOAD_ATTEMPTS: usize = 3;
const RETRY_PAUSE: Duration = Duration::from_secs(2);

/// Puts one dataset file somewhere the transform job can read it.
pub trait Stager: Sync {
  /// Returns the staged object's URI.
  fn stage(&self, url: &str) -> Result<String, EtlError>;
}

pub struct HttpStager {
  client: Client,
  store: Box<dyn BlobStore>,
  prefix: String,
  retry_pause: Duration,
}

impl HttpStager {
  pub fn new(client: Client, store: Box<dyn BlobStore>, prefix: &str) -> Self {
    HttpStager {
      client,
      store,
      prefix: prefix.trim_matches('/').to_string(),
      retry_pause: RETRY_PAUSE,
    }
  }

  /// Pause between failed download attempts.
  pub fn with_retry_pause(mut self, pause: Duration) -> Self {
    self.retry_pause = pause;
    self
  }

  fn download(&self, url: &str) -> Result<Vec<u8>, EtlError> {
    let mut last_failure = String::new();
    for attempt in 1..=DOWNLOAD_ATTEMPTS {
      match self.client.get(url).send() {
        Ok(resp) if resp.status().is_success() => {
          return resp.bytes().map(|b| b.to_vec()).map_err(|e| EtlError::staging(url, e));
        }
        Ok(resp) => last_failure = format!("HTTP status {}", resp.status()),
        Err(e) => last_failure = e.to_string(),
      }
      log::warn!(
        "download of {} failed (attempt {}/{}): {}",
        url,
        attempt,
        DOWNLOAD_ATTEMPTS,
        last_failure
      );
      if attempt < DOWNLOAD_ATTEMPTS {
        thread::sleep(self.retry_pause);
      }
    }
    Err(EtlError::staging(url, last_failure))
  }
}

impl Stager for HttpStager {
  fn stage(&self, url: &str) -> Result<String, EtlError> {
    let start = Instant::now();
    let object_name = staged_object_name(&self.prefix, url)?;
    let bytes = self.download(url)?;
    let size = bytes.len();
    self
      .store
      .put(&object_name, bytes)
      .map_err(|e| EtlError::staging(url, e))?;
    log::info!(
      "staged {} ({} bytes) as {} in {:.2}s",
      url,
      size,
      object_name,
      start.elapsed().as_secs_f64()
    );
    Ok(self.store.uri(&object_name))
  }
}

/// Folder a dataset file is filed under, by taxi color.
pub fn destination_folder(filename: &str) -> &'static str {
  if filename.contains("green") {
    "green_taxi"
  } else if filename.contains("yellow") {
    "yellow_taxi"
  } else {
    "zone_lookup"
  }
}

/// `{prefix}/{folder}/{filename}` for the file `url` points at.
pub fn staged_object_name(prefix: &str, url: &str) -> Result<String, EtlError> {
  let filename = url
    .split(['?', '#'])
    .next()
    .and_then(|path| path.rsplit('/').next())
    .filter(|name| !name.is_empty())
    .ok_or_else(|| EtlError::staging(url, "URL does not name a file"))?;
  let folder = destination_folder(filename);
  Ok(if prefix.is_empty() {
    format!("{}/{}", folder, filename)
  } else {
    format!("{}/{}/{}", prefix, folder, filename)
  })
}

/// Stages every file of the selected pairs concurrently. URIs come back as
/// `[pair0.secondary, pair0.primary, pair1.secondary, ...]`.
pub fn stage_links(stager: &dyn Stager, links: &[LinkPair]) -> Result<Vec<String>, EtlError> {
  let urls: Vec<&str> = links.iter().flat_map(|pair| pair.urls()).collect();
  urls.par_iter().map(|url| stager.stage(url)).collect()
}
