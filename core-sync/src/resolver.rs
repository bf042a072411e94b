//! # Duplicate Resolver
//!
//! The one place that decides whether two records describe the same file.
//!
//! ## Algorithm
//!
//! 1. Drop malformed candidates (empty id, name or MIME type, zero size, or a
//!    remote hash on a local-only record)
//! 2. Keep the first record for each id
//! 3. Records sharing `displayName|sizeBytes|mimeType` are the same content;
//!    keep the newest (`createdAtMs`), the earliest in input order on a tie
//! 4. Emit survivors in their input order
//!
//! The output of `resolve` is a fixed point: resolving it again changes nothing.

use bridge_traits::{FileRecord, StorageClass};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// Comparison key for "is this the same file"
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum RecordKey<'a> {
    Id(&'a str),
    Signature {
        display_name: &'a str,
        size_bytes: u64,
        mime_type: &'a str,
    },
}

impl<'a> RecordKey<'a> {
    fn id(record: &'a FileRecord) -> Self {
        RecordKey::Id(&record.id)
    }

    fn signature(record: &'a FileRecord) -> Self {
        RecordKey::Signature {
            display_name: &record.display_name,
            size_bytes: record.size_bytes,
            mime_type: &record.mime_type,
        }
    }
}

/// Counts of what a resolve pass discarded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveReport {
    pub malformed: usize,
    pub duplicate_ids: usize,
    pub duplicate_signatures: usize,
}

impl ResolveReport {
    pub fn dropped(&self) -> usize {
        self.malformed + self.duplicate_ids + self.duplicate_signatures
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DuplicateResolver;

impl DuplicateResolver {
    pub fn new() -> Self {
        Self
    }

    pub fn resolve(&self, candidates: Vec<FileRecord>) -> Vec<FileRecord> {
        self.resolve_with_report(candidates).0
    }

    pub fn resolve_with_report(&self, candidates: Vec<FileRecord>) -> (Vec<FileRecord>, ResolveReport) {
        let mut report = ResolveReport::default();
        let total = candidates.len();

        let well_formed: Vec<FileRecord> = candidates
            .into_iter()
            .filter(|record| {
                let ok = is_well_formed(record);
                if !ok {
                    report.malformed += 1;
                    debug!(id = %record.id, "Dropping malformed record");
                }
                ok
            })
            .collect();

        let mut seen_ids = HashSet::new();
        let mut unique: Vec<&FileRecord> = Vec::with_capacity(well_formed.len());
        for record in &well_formed {
            if seen_ids.insert(RecordKey::id(record)) {
                unique.push(record);
            } else {
                report.duplicate_ids += 1;
                warn!(id = %record.id, "Listing contains the same id twice; keeping the first");
            }
        }

        // Winner index per signature; strict comparison keeps the earliest on a tie.
        let mut winners: HashMap<RecordKey<'_>, usize> = HashMap::new();
        for (index, record) in unique.iter().enumerate() {
            winners
                .entry(RecordKey::signature(record))
                .and_modify(|winner| {
                    if record.created_at_ms > unique[*winner].created_at_ms {
                        *winner = index;
                    }
                })
                .or_insert(index);
        }

        let kept: HashSet<usize> = winners.into_values().collect();
        report.duplicate_signatures = unique.len() - kept.len();

        let resolved: Vec<FileRecord> = unique
            .into_iter()
            .enumerate()
            .filter(|(index, _)| kept.contains(index))
            .map(|(_, record)| record.clone())
            .collect();

        if report.dropped() > 0 {
            debug!(
                total,
                kept = resolved.len(),
                malformed = report.malformed,
                duplicate_ids = report.duplicate_ids,
                duplicate_signatures = report.duplicate_signatures,
                "Resolved candidate list"
            );
        }

        (resolved, report)
    }

    /// Whether two records would collapse into one
    pub fn same_file(&self, a: &FileRecord, b: &FileRecord) -> bool {
        RecordKey::id(a) == RecordKey::id(b) || RecordKey::signature(a) == RecordKey::signature(b)
    }
}

fn is_well_formed(record: &FileRecord) -> bool {
    !record.id.trim().is_empty()
        && !record.display_name.trim().is_empty()
        && !record.mime_type.trim().is_empty()
        && record.size_bytes > 0
        && !(record.remote_hash.is_some() && record.storage_class == StorageClass::LocalOnly)
}
