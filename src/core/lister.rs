//! Source bucket enumeration and candidate filtering
//!
//! Listing completes before any transfer starts: a partial listing would
//! leave the dispatcher unaware of the candidates it missed, so any listing
//! failure aborts the run.

use crate::config::ArchiveRequest;
use crate::core::RetryPolicy;
use crate::error::{ArchiveError, Result};
use crate::storage::{ObjectDescriptor, ObjectStore, StorageOp};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::sync::Arc;

/// Maximum prefix listings in flight at once
pub const LISTING_CONCURRENCY: usize = 10;

/// Why a listed object is not a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterReason {
    /// Key ends with `/`
    Placeholder,
    /// Key matches none of the prefixes
    Prefix,
    /// Younger than the minimum age, or age unknown
    Age,
    /// Storage class differs from the requested one
    StorageClass,
}

/// Per-reason rejection counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterStats {
    /// Directory placeholders
    pub placeholder: u64,
    /// Prefix mismatches
    pub prefix: u64,
    /// Too young or undated
    pub age: u64,
    /// Storage class mismatches
    pub storage_class: u64,
}

impl FilterStats {
    fn count(&mut self, reason: FilterReason) {
        match reason {
            FilterReason::Placeholder => self.placeholder += 1,
            FilterReason::Prefix => self.prefix += 1,
            FilterReason::Age => self.age += 1,
            FilterReason::StorageClass => self.storage_class += 1,
        }
    }

    /// Total rejected objects
    pub fn total(&self) -> u64 {
        self.placeholder + self.prefix + self.age + self.storage_class
    }
}

/// Filter predicates evaluated against a fixed run time
#[derive(Debug, Clone)]
pub struct CandidateFilter {
    prefixes: Vec<String>,
    min_age: chrono::Duration,
    storage_class: Option<String>,
    now: DateTime<Utc>,
}

impl CandidateFilter {
    /// Build the filter for `request` as of `now`
    pub fn new(request: &ArchiveRequest, now: DateTime<Utc>) -> Self {
        let prefixes = if request.matches_all_keys() {
            Vec::new()
        } else {
            request.prefixes.clone()
        };

        Self {
            prefixes,
            min_age: chrono::Duration::from_std(request.min_age)
                .unwrap_or(chrono::Duration::MAX),
            storage_class: request.storage_class_filter.clone(),
            now,
        }
    }

    /// `None` when the object is a candidate
    pub fn rejects(&self, object: &ObjectDescriptor) -> Option<FilterReason> {
        if object.is_placeholder() {
            return Some(FilterReason::Placeholder);
        }

        if !self.prefixes.is_empty() && !self.prefixes.iter().any(|p| object.key.starts_with(p.as_str())) {
            return Some(FilterReason::Prefix);
        }

        if self.min_age > chrono::Duration::zero() {
            match object.last_modified {
                Some(modified) if self.now.signed_duration_since(modified) >= self.min_age => {}
                _ => return Some(FilterReason::Age),
            }
        }

        if let Some(wanted) = &self.storage_class {
            if !object
                .storage_class
                .as_deref()
                .is_some_and(|class| class.eq_ignore_ascii_case(wanted))
            {
                return Some(FilterReason::StorageClass);
            }
        }

        None
    }
}

/// Result of enumerating the source bucket
#[derive(Debug, Clone, Default)]
pub struct Listing {
    /// Objects that passed every filter, in no particular order
    pub candidates: Vec<ObjectDescriptor>,
    /// Objects examined
    pub examined: u64,
    /// Rejections by reason
    pub rejected: FilterStats,
    /// Backend pages fetched
    pub pages: u64,
}

impl Listing {
    /// Number of candidates
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    /// True when nothing matched
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Total bytes across candidates
    pub fn total_bytes(&self) -> u64 {
        self.candidates.iter().map(|c| c.size).sum()
    }
}

impl IntoIterator for Listing {
    type Item = ObjectDescriptor;
    type IntoIter = std::vec::IntoIter<ObjectDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.candidates.into_iter()
    }
}

/// Server-side prefixes to list: `[None]` for a full listing, otherwise the
/// distinct prefixes with any prefix covered by a shorter one dropped, so no
/// key is listed twice.
pub fn listing_prefixes(request: &ArchiveRequest) -> Vec<Option<String>> {
    if request.matches_all_keys() {
        return vec![None];
    }

    let mut sorted: Vec<&String> = request.prefixes.iter().collect();
    sorted.sort_by_key(|p| p.len());

    let mut kept: Vec<String> = Vec::new();
    for prefix in sorted {
        if !kept.iter().any(|k| prefix.starts_with(k.as_str())) {
            kept.push(prefix.clone());
        }
    }
    kept.into_iter().map(Some).collect()
}

/// Enumerates candidates from the source bucket
pub struct ObjectLister {
    store: Arc<dyn ObjectStore>,
    request: Arc<ArchiveRequest>,
    retry: RetryPolicy,
}

impl ObjectLister {
    /// Create a lister
    pub fn new(store: Arc<dyn ObjectStore>, request: Arc<ArchiveRequest>, retry: RetryPolicy) -> Self {
        Self {
            store,
            request,
            retry,
        }
    }

    /// Enumerate and filter the source bucket as of `now`
    ///
    /// Each call re-lists from scratch.
    pub async fn list(&self, now: DateTime<Utc>) -> Result<Listing> {
        let filter = CandidateFilter::new(&self.request, now);
        let prefixes = listing_prefixes(&self.request);

        tracing::info!(
            bucket = %self.request.source_bucket,
            backend = self.store.name(),
            prefixes = prefixes.len(),
            "Listing source bucket"
        );

        let batches: Vec<(Vec<ObjectDescriptor>, u64)> = stream::iter(prefixes)
            .map(|prefix| self.list_prefix(prefix))
            .buffer_unordered(LISTING_CONCURRENCY)
            .try_collect()
            .await?;

        let mut listing = Listing::default();
        for (objects, pages) in batches {
            listing.pages += pages;
            for object in objects {
                listing.examined += 1;
                match filter.rejects(&object) {
                    None => listing.candidates.push(object),
                    Some(reason) => {
                        tracing::trace!(key = %object.key, ?reason, "Filtered out");
                        listing.rejected.count(reason);
                    }
                }
            }
        }

        tracing::info!(
            examined = listing.examined,
            candidates = listing.candidates.len(),
            rejected = listing.rejected.total(),
            bytes = %humansize::format_size(listing.total_bytes(), humansize::BINARY),
            "Listing complete"
        );

        Ok(listing)
    }

    async fn list_prefix(&self, prefix: Option<String>) -> Result<(Vec<ObjectDescriptor>, u64)> {
        let bucket = self.request.source_bucket.as_str();
        let label = prefix.clone().unwrap_or_default();
        let mut objects = Vec::new();
        let mut token: Option<String> = None;
        let mut pages = 0u64;

        loop {
            let page = self
                .retry
                .run(StorageOp::List, &label, || {
                    self.store.list_page(bucket, prefix.as_deref(), token.clone())
                })
                .await
                .map_err(|failure| ArchiveError::Listing {
                    bucket: bucket.to_string(),
                    attempts: failure.attempts,
                    source: failure.error,
                })?
                .value;

            pages += 1;
            objects.extend(page.objects);

            match page.next_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        tracing::debug!(prefix = %label, objects = objects.len(), pages, "Prefix listed");
        Ok((objects, pages))
    }
}
