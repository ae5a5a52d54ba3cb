//! Result types returned to callers.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

/// Aggregate result of one [`crate::Dispatcher::dispatch`] call.
///
/// Every input key lands in exactly one of `descriptions` or `failed_keys`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    /// Key → description for every image that was described.
    pub descriptions: BTreeMap<String, String>,
    /// Keys that have no description, in the order they were given up on.
    pub failed_keys: Vec<String>,
    /// The run switched to one call at a time after a chunk hit rate limits.
    pub degraded_to_sequential: bool,
    /// The endpoint rejected the credential; no further calls were made.
    pub api_totally_failed: bool,
}

/// How a caller should react to a [`BatchResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchOutcome {
    /// Every image was described.
    FullSuccess,
    /// Some images failed; report the count and carry on.
    PartialSuccess,
    /// The API is unusable. Do not retry automatically; fix the credential.
    TotalFailure,
}

impl BatchResult {
    pub fn outcome(&self) -> BatchOutcome {
        if self.api_totally_failed {
            BatchOutcome::TotalFailure
        } else if self.failed_keys.is_empty() {
            BatchOutcome::FullSuccess
        } else {
            BatchOutcome::PartialSuccess
        }
    }

    /// True when `descriptions` and `failed_keys` are disjoint, `failed_keys`
    /// has no duplicates, and together they cover exactly `keys`.
    pub fn is_partition_of<'a>(&self, keys: impl IntoIterator<Item = &'a str>) -> bool {
        let expected: HashSet<&str> = keys.into_iter().collect();

        let mut seen: HashSet<&str> = HashSet::with_capacity(expected.len());
        for key in self.descriptions.keys() {
            seen.insert(key.as_str());
        }
        for key in &self.failed_keys {
            if !seen.insert(key.as_str()) {
                return false;
            }
        }
        seen == expected
    }
}

/// Per-document summary produced by [`crate::convert::describe_document`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentReport {
    /// The Markdown file that was read.
    pub source: PathBuf,
    /// The `.iee.md` file written, if any description was produced.
    pub output: Option<PathBuf>,
    /// Image references found in the document.
    pub references: usize,
    /// Distinct images sent to the VLM.
    pub images: usize,
    /// Images that received a description.
    pub described: usize,
    pub failed_keys: Vec<String>,
    pub degraded_to_sequential: bool,
    pub api_totally_failed: bool,
    pub duration_ms: u64,
}

/// A document that could not be processed at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentFailure {
    pub source: PathBuf,
    pub error: String,
}

/// Summary of [`crate::convert::describe_directory`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectoryReport {
    pub documents: Vec<DocumentReport>,
    pub errors: Vec<DocumentFailure>,
    /// Documents left untouched because the API was declared unusable.
    pub skipped: Vec<PathBuf>,
}

impl DirectoryReport {
    /// True when any document hit a total API failure.
    pub fn api_unusable(&self) -> bool {
        self.documents.iter().any(|d| d.api_totally_failed)
    }

    pub fn total_described(&self) -> usize {
        self.documents.iter().map(|d| d.described).sum()
    }

    pub fn total_failed(&self) -> usize {
        self.documents.iter().map(|d| d.failed_keys.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(described: &[&str], failed: &[&str]) -> BatchResult {
        BatchResult {
            descriptions: described
                .iter()
                .map(|k| (k.to_string(), format!("desc of {k}")))
                .collect(),
            failed_keys: failed.iter().map(|k| k.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn outcome_classification() {
        assert_eq!(result(&["a"], &[]).outcome(), BatchOutcome::FullSuccess);
        assert_eq!(result(&["a"], &["b"]).outcome(), BatchOutcome::PartialSuccess);
        let mut total = result(&[], &["a"]);
        total.api_totally_failed = true;
        assert_eq!(total.outcome(), BatchOutcome::TotalFailure);
    }

    #[test]
    fn partition_accepts_exact_cover() {
        assert!(result(&["a", "b"], &["c"]).is_partition_of(["a", "b", "c"]));
        assert!(BatchResult::default().is_partition_of(std::iter::empty()));
    }

    #[test]
    fn partition_rejects_overlap_missing_and_extra() {
        assert!(!result(&["a"], &["a"]).is_partition_of(["a"]));
        assert!(!result(&["a"], &[]).is_partition_of(["a", "b"]));
        assert!(!result(&["a", "z"], &[]).is_partition_of(["a"]));
        assert!(!result(&[], &["a", "a"]).is_partition_of(["a"]));
    }

    #[test]
    fn directory_totals() {
        let doc = |described, failed: Vec<String>, dead| DocumentReport {
            source: PathBuf::from("full.md"),
            output: None,
            references: 3,
            images: 3,
            described,
            failed_keys: failed,
            degraded_to_sequential: false,
            api_totally_failed: dead,
            duration_ms: 0,
        };
        let report = DirectoryReport {
            documents: vec![doc(2, vec!["x".into()], false), doc(0, vec![], true)],
            ..Default::default()
        };
        assert_eq!(report.total_described(), 2);
        assert_eq!(report.total_failed(), 1);
        assert!(report.api_unusable());
    }
}
