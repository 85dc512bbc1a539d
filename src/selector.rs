//! Picks this run's share of the catalog and advances the run counter.

use serde::{Deserialize, Serialize};

use crate::catalog::{LinkCatalog, LinkPair};
use crate::error::EtlError;
use crate::progress::ProgressTracker;

/// How the run counter maps to a catalog position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexPolicy {
  /// Run `n` takes catalog indices `2n` and `2n + 1`. Compatible with
  /// counters written by the deployed pipeline.
  #[default]
  Doubled,
  /// Run `n` takes catalog index `n` only, one month per run.
  Single,
}

impl IndexPolicy {
  pub fn start(self, runs_completed: u64) -> usize {
    let start = match self {
      IndexPolicy::Doubled => runs_completed.saturating_mul(2),
      IndexPolicy::Single => runs_completed,
    };
    usize::try_from(start).unwrap_or(usize::MAX)
  }

  /// Pairs handed out per run, at most.
  pub fn window(self) -> usize {
    match self {
      IndexPolicy::Doubled => 2,
      IndexPolicy::Single => 1,
    }
  }
}

/// This run's work item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionResult {
  pub links: Vec<LinkPair>,
  pub is_first_run: bool,
  /// Counter value persisted by this selection.
  pub runs_completed: u64,
}

/// The pairs run number `runs_completed` gets, without touching any state.
pub fn plan(catalog: &LinkCatalog, runs_completed: u64, policy: IndexPolicy) -> Vec<LinkPair> {
  let start = policy.start(runs_completed);
  (start..start.saturating_add(policy.window()))
    .filter_map(|index| catalog.get(index).cloned())
    .collect()
}

/// Selects the next unconsumed pairs and records the run.
///
/// The counter is bumped even when nothing is left to select, so once the
/// catalog is exhausted every further run just keeps counting. If persisting
/// the bump fails the selection is withheld; retrying picks the same pairs.
pub fn select(
  tracker: &ProgressTracker,
  catalog: &LinkCatalog,
  policy: IndexPolicy,
) -> Result<SelectionResult, EtlError> {
  let progress = tracker.read()?;
  let links = plan(catalog, progress.count, policy);
  let runs_completed = progress.count.saturating_add(1);
  tracker.write(runs_completed)?;

  if links.is_empty() {
    log::info!(
      "catalog of {} pairs exhausted at run {}, nothing new",
      catalog.len(),
      progress.count
    );
  } else {
    log::info!(
      "run {} selected {} pair(s) starting at catalog index {}",
      progress.count,
      links.len(),
      policy.start(progress.count)
    );
  }
  Ok(SelectionResult {
    links,
    is_first_run: !progress.exists,
    runs_completed,
  })
}
