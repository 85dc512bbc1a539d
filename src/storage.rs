//! Blob stores holding the run counter and the staged dataset files.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;

use reqwest::blocking::Client;
use reqwest::{StatusCode, Url};

use crate::error::StorageError;

/// Minimal object storage: whole-object reads and overwrites.
pub trait BlobStore: Send + Sync {
  /// `Ok(None)` when the object does not exist.
  fn get(&self, name: &str) -> Result<Option<Vec<u8>>, StorageError>;

  fn put(&self, name: &str, data: Vec<u8>) -> Result<(), StorageError>;

  /// Location of `name` as seen by downstream consumers.
  fn uri(&self, name: &str) -> String;
}

/// A Google Cloud Storage bucket, via the JSON API.
pub struct GcsBlobStore {
  client: Client,
  endpoint: String,
  bucket: String,
  token: Option<String>,
}

impl GcsBlobStore {
  pub fn new(client: Client, endpoint: &str, bucket: &str, token: Option<String>) -> Self {
    GcsBlobStore {
      client,
      endpoint: endpoint.trim_end_matches('/').to_string(),
      bucket: bucket.to_string(),
      token,
    }
  }

  fn object_url(&self, name: &str) -> Result<Url, StorageError> {
    let mut url = Url::parse(&self.endpoint).map_err(|_| StorageError::InvalidName(self.endpoint.clone()))?;
    url
      .path_segments_mut()
      .map_err(|_| StorageError::InvalidName(self.endpoint.clone()))?
      .pop_if_empty()
      .extend(&["storage", "v1", "b", self.bucket.as_str(), "o", name]);
    Ok(url)
  }

  fn upload_url(&self) -> Result<Url, StorageError> {
    let mut url = Url::parse(&self.endpoint).map_err(|_| StorageError::InvalidName(self.endpoint.clone()))?;
    url
      .path_segments_mut()
      .map_err(|_| StorageError::InvalidName(self.endpoint.clone()))?
      .pop_if_empty()
      .extend(&["upload", "storage", "v1", "b", self.bucket.as_str(), "o"]);
    Ok(url)
  }

  fn authorize(&self, request: reqwest::blocking::RequestBuilder) -> reqwest::blocking::RequestBuilder {
    match &self.token {
      Some(token) => request.bearer_auth(token),
      None => request,
    }
  }
}

impl BlobStore for GcsBlobStore {
  fn get(&self, name: &str) -> Result<Option<Vec<u8>>, StorageError> {
    let url = self.object_url(name)?;
    let resp = self.authorize(self.client.get(url).query(&[("alt", "media")])).send()?;
    match resp.status() {
      StatusCode::OK => Ok(Some(resp.bytes()?.to_vec())),
      StatusCode::NOT_FOUND => Ok(None),
      other => Err(StorageError::Status {
        name: name.to_string(),
        status: other.as_u16(),
      }),
    }
  }

  fn put(&self, name: &str, data: Vec<u8>) -> Result<(), StorageError> {
    let url = self.upload_url()?;
    let resp = self
      .authorize(
        self
          .client
          .post(url)
          .query(&[("uploadType", "media"), ("name", name)])
          .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
          .body(data),
      )
      .send()?;
    if resp.status().is_success() {
      Ok(())
    } else {
      Err(StorageError::Status {
        name: name.to_string(),
        status: resp.status().as_u16(),
      })
    }
  }

  fn uri(&self, name: &str) -> String {
    format!("gs://{}/{}", self.bucket, name)
  }
}

/// Objects as plain files below a root directory.
pub struct LocalBlobStore {
  root: PathBuf,
}

impl LocalBlobStore {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    LocalBlobStore { root: root.into() }
  }

  fn path_of(&self, name: &str) -> Result<PathBuf, StorageError> {
    let relative = Path::new(name);
    let inside = !name.is_empty()
      && relative
        .components()
        .all(|component| matches!(component, Component::Normal(_)));
    if !inside {
      return Err(StorageError::InvalidName(name.to_string()));
    }
    Ok(self.root.join(relative))
  }
}

impl BlobStore for LocalBlobStore {
  fn get(&self, name: &str) -> Result<Option<Vec<u8>>, StorageError> {
    match fs::read(self.path_of(name)?) {
      Ok(bytes) => Ok(Some(bytes)),
      Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
      Err(e) => Err(e.into()),
    }
  }

  fn put(&self, name: &str, data: Vec<u8>) -> Result<(), StorageError> {
    let path = self.path_of(name)?;
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent)?;
    }
    fs::write(path, data)?;
    Ok(())
  }

  fn uri(&self, name: &str) -> String {
    format!("file://{}", self.root.join(name).display())
  }
}

/// Keeps objects in process memory; nothing survives the run.
#[derive(Default)]
pub struct MemoryBlobStore {
  objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_object(name: &str, data: impl Into<Vec<u8>>) -> Self {
    let store = Self::new();
    store.insert(name, data.into());
    store
  }

  fn insert(&self, name: &str, data: Vec<u8>) {
    let mut objects = self.objects.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    objects.insert(name.to_string(), data);
  }
}

impl BlobStore for MemoryBlobStore {
  fn get(&self, name: &str) -> Result<Option<Vec<u8>>, StorageError> {
    let objects = self.objects.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    Ok(objects.get(name).cloned())
  }

  fn put(&self, name: &str, data: Vec<u8>) -> Result<(), StorageError> {
    self.insert(name, data);
    Ok(())
  }

  fn uri(&self, name: &str) -> String {
    format!("memory://{}", name)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_local_store_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalBlobStore::new(dir.path());
    assert!(store.get("green_taxi/a.parquet").unwrap().is_none());
    store.put("green_taxi/a.parquet", b"PAR1".to_vec()).unwrap();
    assert_eq!(store.get("green_taxi/a.parquet").unwrap(), Some(b"PAR1".to_vec()));
    assert!(store.uri("green_taxi/a.parquet").starts_with("file://"));
  }

  #[test]
  fn test_local_store_rejects_escaping_names() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalBlobStore::new(dir.path());
    for name in ["../outside.txt", "/etc/passwd", "a/../../b", ""] {
      assert!(
        matches!(store.put(name, vec![]), Err(StorageError::InvalidName(_))),
        "{name} should be rejected"
      );
    }
  }

  #[test]
  fn test_gcs_object_url_encodes_name() {
    let store = GcsBlobStore::new(Client::new(), "https://storage.googleapis.com/", "bucket", None);
    let url = store.object_url("taxi_trip_data/green_taxi/x.parquet").unwrap();
    assert_eq!(
      url.as_str(),
      "https://storage.googleapis.com/storage/v1/b/bucket/o/taxi_trip_data%2Fgreen_taxi%2Fx.parquet"
    );
    assert_eq!(store.uri("run_times.txt"), "gs://bucket/run_times.txt");
  }

  #[test]
  fn test_memory_store() {
    let store = MemoryBlobStore::with_object("run_times.txt", "run times: 4");
    assert_eq!(store.get("run_times.txt").unwrap(), Some(b"run times: 4".to_vec()));
    assert!(store.get("other").unwrap().is_none());
    store.put("other", vec![1]).unwrap();
    assert_eq!(store.get("other").unwrap(), Some(vec![1]));
  }

  fn gcs_store(endpoint: &str) -> GcsBlobStore {
    GcsBlobStore::new(Client::new(), endpoint, "bucket", Some("token".to_string()))
  }

  #[test]
  fn test_gcs_get_existing_object() {
    let mut server = mockito::Server::new();
    let object = server
      .mock("GET", "/storage/v1/b/bucket/o/run_times.txt")
      .match_query(mockito::Matcher::UrlEncoded("alt".into(), "media".into()))
      .match_header("authorization", "Bearer token")
      .with_status(200)
      .with_body("run times: 7")
      .create();
    let store = gcs_store(&server.url());
    assert_eq!(store.get("run_times.txt").unwrap(), Some(b"run times: 7".to_vec()));
    object.assert();
  }

  #[test]
  fn test_gcs_missing_object_is_none() {
    let mut server = mockito::Server::new();
    let object = server
      .mock("GET", "/storage/v1/b/bucket/o/run_times.txt")
      .match_query(mockito::Matcher::Any)
      .with_status(404)
      .create();
    assert!(gcs_store(&server.url()).get("run_times.txt").unwrap().is_none());
    object.assert();
  }

  #[test]
  fn test_gcs_other_status_is_error() {
    let mut server = mockito::Server::new();
    for status in [403, 500] {
      let object = server
        .mock("GET", "/storage/v1/b/bucket/o/run_times.txt")
        .match_query(mockito::Matcher::Any)
        .with_status(status)
        .create();
      match gcs_store(&server.url()).get("run_times.txt") {
        Err(StorageError::Status { name, status: got }) => {
          assert_eq!(name, "run_times.txt");
          assert_eq!(got, status as u16);
        }
        other => panic!("expected a status error, got {:?}", other),
      }
      object.assert();
      object.remove();
    }
  }

  #[test]
  fn test_gcs_put_uploads_media() {
    let mut server = mockito::Server::new();
    let upload = server
      .mock("POST", "/upload/storage/v1/b/bucket/o")
      .match_query(mockito::Matcher::AllOf(vec![
        mockito::Matcher::UrlEncoded("uploadType".into(), "media".into()),
        mockito::Matcher::UrlEncoded("name".into(), "run_times.txt".into()),
      ]))
      .match_body("run times: 8")
      .with_status(200)
      .with_body("{}")
      .create();
    gcs_store(&server.url()).put("run_times.txt", b"run times: 8".to_vec()).unwrap();
    upload.assert();
  }

  #[test]
  fn test_gcs_rejected_upload_is_error() {
    let mut server = mockito::Server::new();
    let upload = server
      .mock("POST", "/upload/storage/v1/b/bucket/o")
      .match_query(mockito::Matcher::Any)
      .with_status(401)
      .create();
    assert!(matches!(
      gcs_store(&server.url()).put("run_times.txt", vec![]),
      Err(StorageError::Status { status: 401, .. })
    ));
    upload.assert();
  }
}
