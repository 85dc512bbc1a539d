//! Incremental monthly taxi-trip ETL: finds the next month's trip-record files
//! on the publisher's listing page, stages them into object storage and hands
//! them to the cleaning transform.

pub mod catalog;
pub mod config;
pub mod error;
pub mod flow;
pub mod progress;
pub mod selector;
pub mod staging;
pub mod storage;
pub mod transform;

pub use catalog::{LinkCatalog, LinkPair};
pub use error::{EtlError, StorageError};
pub use selector::{IndexPolicy, SelectionResult};
