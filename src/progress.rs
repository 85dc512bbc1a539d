//! The persisted "runs completed" counter.
//!
//! The counter lives in a small text blob (`run times: N`). There is no
//! compare-and-swap: two overlapping runs can both read `N` and both write
//! `N + 1`, so runs must be serialized by whoever schedules them.

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::EtlError;
use crate::storage::BlobStore;

lazy_static! {
  static ref COUNTER_REGEX: Regex = Regex::new(r"[\w\s]*:\s*(\d+)").unwrap();
}

pub const COUNTER_LABEL: &str = "run times";

/// A counter value together with whether it was found in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
  pub count: u64,
  pub exists: bool,
}

pub struct ProgressTracker {
  store: Box<dyn BlobStore>,
  blob_name: String,
}

impl ProgressTracker {
  pub fn new(store: Box<dyn BlobStore>, blob_name: &str) -> Self {
    ProgressTracker {
      store,
      blob_name: blob_name.to_string(),
    }
  }

  /// Reads the counter. An absent or unparsable blob counts as a first run and
  /// is (re)initialized to zero; an unreachable store is an error.
  pub fn read(&self) -> Result<Progress, EtlError> {
    let progress = self.peek()?;
    if !progress.exists {
      log::info!("no usable progress blob {}, initializing it", self.blob_name);
      self.write(0)?;
    }
    Ok(progress)
  }

  /// Same as [`read`](Self::read) without initializing a missing blob.
  pub fn peek(&self) -> Result<Progress, EtlError> {
    let content = self.store.get(&self.blob_name).map_err(EtlError::Persistence)?;
    let count = content.and_then(|bytes| parse_counter(&String::from_utf8_lossy(&bytes)));
    Ok(match count {
      Some(count) => Progress { count, exists: true },
      None => Progress {
        count: 0,
        exists: false,
      },
    })
  }

  /// Overwrites the persisted counter.
  pub fn write(&self, count: u64) -> Result<(), EtlError> {
    self
      .store
      .put(&self.blob_name, format_counter(count).into_bytes())
      .map_err(EtlError::Persistence)
  }
}

pub fn parse_counter(text: &str) -> Option<u64> {
  COUNTER_REGEX
    .captures(text)
    .and_then(|cap| cap.get(1))
    .and_then(|m| m.as_str().parse().ok())
}

pub fn format_counter(count: u64) -> String {
  format!("{}: {}", COUNTER_LABEL, count)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::StorageError;
  use crate::storage::MemoryBlobStore;

  struct UnreachableStore;

  impl BlobStore for UnreachableStore {
    fn get(&self, name: &str) -> Result<Option<Vec<u8>>, StorageError> {
      Err(StorageError::Status {
        name: name.to_string(),
        status: 503,
      })
    }

    fn put(&self, name: &str, _data: Vec<u8>) -> Result<(), StorageError> {
      Err(StorageError::Status {
        name: name.to_string(),
        status: 503,
      })
    }

    fn uri(&self, name: &str) -> String {
      name.to_string()
    }
  }

  #[test]
  fn test_parse_counter() {
    assert_eq!(parse_counter("run times: 7"), Some(7));
    assert_eq!(parse_counter("run times:12\n"), Some(12));
    assert_eq!(parse_counter("Runs completed : 3"), Some(3));
    assert_eq!(parse_counter("run times: many"), None);
    assert_eq!(parse_counter(""), None);
  }

  #[test]
  fn test_first_read_initializes_blob() {
    let tracker = ProgressTracker::new(Box::new(MemoryBlobStore::new()), "run_times.txt");
    assert_eq!(
      tracker.read().unwrap(),
      Progress {
        count: 0,
        exists: false
      }
    );
    assert_eq!(
      tracker.peek().unwrap(),
      Progress {
        count: 0,
        exists: true
      }
    );
  }

  #[test]
  fn test_peek_has_no_side_effect() {
    let tracker = ProgressTracker::new(Box::new(MemoryBlobStore::new()), "run_times.txt");
    assert!(!tracker.peek().unwrap().exists);
    assert!(!tracker.peek().unwrap().exists);
  }

  #[test]
  fn test_unparsable_blob_counts_as_first_run() {
    let store = MemoryBlobStore::with_object("run_times.txt", "garbage");
    let tracker = ProgressTracker::new(Box::new(store), "run_times.txt");
    assert!(!tracker.read().unwrap().exists);
    assert_eq!(tracker.peek().unwrap().count, 0);
  }

  #[test]
  fn test_write_then_read() {
    let tracker = ProgressTracker::new(Box::new(MemoryBlobStore::new()), "run_times.txt");
    tracker.write(5).unwrap();
    assert_eq!(
      tracker.read().unwrap(),
      Progress {
        count: 5,
        exists: true
      }
    );
  }

  #[test]
  fn test_write_of_read_count_is_noop() {
    let store = MemoryBlobStore::with_object("run_times.txt", "run times: 9");
    let tracker = ProgressTracker::new(Box::new(store), "run_times.txt");
    let before = tracker.peek().unwrap();
    tracker.write(tracker.read().unwrap().count).unwrap();
    assert_eq!(tracker.peek().unwrap(), before);
  }

  #[test]
  fn test_unreachable_store_is_not_a_first_run() {
    let tracker = ProgressTracker::new(Box::new(UnreachableStore), "run_times.txt");
    assert!(matches!(tracker.read(), Err(EtlError::Persistence(_))));
    assert!(matches!(tracker.write(1), Err(EtlError::Persistence(_))));
  }
}
