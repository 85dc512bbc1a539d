//! Error types shared by the pipeline stages.

use thiserror::Error;

/// Failures of a blob store backend.
#[derive(Debug, Error)]
pub enum StorageError {
  /// The request never got an answer.
  #[error("blob store request failed: {0}")]
  Http(#[from] reqwest::Error),

  /// The store answered, but not with something we can use.
  #[error("blob store answered {status} for {name}")]
  Status { name: String, status: u16 },

  #[error("blob store I/O error: {0}")]
  Io(#[from] std::io::Error),

  /// Object names must stay inside the store.
  #[error("invalid object name: {0}")]
  InvalidName(String),
}

/// Errors surfaced by a pipeline run.
#[derive(Debug, Error)]
pub enum EtlError {
  /// The listing page could not be retrieved.
  #[error("failed to fetch {url}: {reason}")]
  Fetch { url: String, reason: String },

  /// The listing page no longer has the expected structure.
  #[error("listing page layout mismatch: {0}")]
  Layout(String),

  /// The progress blob could not be read or written.
  #[error("progress store unavailable: {0}")]
  Persistence(#[source] StorageError),

  /// A dataset file could not be downloaded or uploaded.
  #[error("failed to stage {url}: {reason}")]
  Staging { url: String, reason: String },

  #[error("transform job failed: {0}")]
  Transform(String),

  #[error("configuration error: {0}")]
  Config(String),
}

impl EtlError {
  pub fn fetch(url: &str, reason: impl ToString) -> Self {
    Self::Fetch {
      url: url.to_string(),
      reason: reason.to_string(),
    }
  }

  pub fn staging(url: &str, reason: impl ToString) -> Self {
    Self::Staging {
      url: url.to_string(),
      reason: reason.to_string(),
    }
  }

  /// Layout errors mean the publisher changed the page, not that there is nothing new.
  pub fn is_layout_change(&self) -> bool {
    matches!(self, Self::Layout(_))
  }
}
