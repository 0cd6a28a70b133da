//! Archive status lookups
//!
//! One lookup per candidate object, spread over the healthy nodes with a
//! bounded number in flight. Rows come back in candidate order.

use std::sync::atomic::{AtomicUsize, Ordering};

use futures::{StreamExt as _, TryStreamExt as _, stream};
use indexmap::IndexMap;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::{
    cluster::Client,
    config::{LookupFailurePolicy, ObjectTypeSpec},
    progress::ProgressReporter,
};

use super::{
    CandidateObject, JobError,
    schema::{ColumnIndex, cell_text},
    topology::HealthyNodes,
};

/// Most recent off-site replication of one object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveStatus {
    /// Date of the first snapshot with `cloudState > 0`, as sent by the cluster.
    Archived(String),
    NotArchived,
    LookupFailed(String),
}

impl std::fmt::Display for ArchiveStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Archived(date) => f.write_str(date),
            Self::NotArchived => f.write_str("None"),
            Self::LookupFailed(reason) => write!(f, "LookupFailed: {reason}"),
        }
    }
}

/// One output line: display columns followed by the archive status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRow {
    pub object_id: String,
    pub fields: Vec<String>,
    pub archive: ArchiveStatus,
}

impl ReportRow {
    pub fn cells(&self) -> impl Iterator<Item = String> + '_ {
        self.fields
            .iter()
            .cloned()
            .chain(std::iter::once(self.archive.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("response has no {0:?} array")]
    MissingArray(String),
    #[error("malformed snapshot #{index}: {error}")]
    Malformed {
        index: usize,
        error: serde_json::Error,
    },
    #[error("archived snapshot #{index} has no date")]
    MissingDate { index: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum LookupError<E> {
    #[error("{0}")]
    Transport(E),
    #[error("{0}")]
    Snapshots(#[from] SnapshotError),
    #[error("no lookup configured for object type {0:?}")]
    UnknownType(String),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snapshot {
    cloud_state: f64,
    date: Option<String>,
}

/// Scan `body[array]` in order and return the date of the first snapshot that
/// reached the archive target.
pub fn first_archived(body: &serde_json::Value, array: &str) -> Result<ArchiveStatus, SnapshotError> {
    let snapshots = body
        .get(array)
        .and_then(serde_json::Value::as_array)
        .ok_or_else(|| SnapshotError::MissingArray(array.to_owned()))?;
    for (index, entry) in snapshots.iter().enumerate() {
        let snapshot = Snapshot::deserialize(entry)
            .map_err(|error| SnapshotError::Malformed { index, error })?;
        if snapshot.cloud_state > 0.0 {
            let date = snapshot.date.ok_or(SnapshotError::MissingDate { index })?;
            return Ok(ArchiveStatus::Archived(date));
        }
    }
    Ok(ArchiveStatus::NotArchived)
}

pub struct ArchiveLookupPool<'a, C> {
    client: &'a C,
    nodes: HealthyNodes,
    object_types: &'a IndexMap<String, ObjectTypeSpec>,
    policy: LookupFailurePolicy,
    concurrency: usize,
    progress: &'a dyn ProgressReporter,
}

impl<'a, C: Client> ArchiveLookupPool<'a, C> {
    /// In-flight lookups are capped at `nodes × threads_per_node`, fixed here.
    pub fn new(
        client: &'a C,
        nodes: HealthyNodes,
        threads_per_node: usize,
        object_types: &'a IndexMap<String, ObjectTypeSpec>,
        policy: LookupFailurePolicy,
        progress: &'a dyn ProgressReporter,
    ) -> Self {
        let concurrency = nodes.len().saturating_mul(threads_per_node).max(1);
        Self {
            client,
            nodes,
            object_types,
            policy,
            concurrency,
            progress,
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    async fn lookup(
        &self,
        node: &url::Url,
        candidate: &CandidateObject,
    ) -> Result<ArchiveStatus, LookupError<C::Error>> {
        let spec = self
            .object_types
            .get(&candidate.object_type)
            .ok_or_else(|| LookupError::<C::Error>::UnknownType(candidate.object_type.clone()))?;
        let path = spec.path_for(&candidate.object_id);
        debug!(%node, path, object_id = candidate.object_id, "lookup archive status");
        let body = self
            .client
            .snapshots(node, &path)
            .await
            .map_err(LookupError::Transport)?;
        Ok(first_archived(&body, &spec.array)?)
    }

    /// Run one lookup per candidate and return exactly one row per candidate,
    /// in candidate order.
    pub async fn run(
        &self,
        candidates: &[CandidateObject],
        index: &ColumnIndex,
    ) -> Result<Vec<ReportRow>, JobError<C::Error>> {
        let total = candidates.len();
        self.progress.register_lookups(total);
        let completed = AtomicUsize::new(0);
        let completed = &completed;

        stream::iter(candidates)
            .map(|candidate| {
                let node = self.nodes.choose();
                async move {
                    let outcome = self.lookup(node, candidate).await;
                    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    let archive = match outcome {
                        Ok(status) => status,
                        Err(error) => {
                            warn!(%node, object_id = candidate.object_id, %error, "lookup failed");
                            let status = ArchiveStatus::LookupFailed(error.to_string());
                            if self.policy == LookupFailurePolicy::Abort {
                                self.progress
                                    .lookup_finished(&candidate.object_name, &status, done, total);
                                return Err(JobError::Lookup {
                                    object_id: candidate.object_id.clone(),
                                    error,
                                });
                            }
                            status
                        }
                    };
                    self.progress
                        .lookup_finished(&candidate.object_name, &archive, done, total);
                    Ok(ReportRow {
                        object_id: candidate.object_id.clone(),
                        fields: index
                            .display
                            .iter()
                            .map(|&position| {
                                candidate.raw.get(position).map(cell_text).unwrap_or_default()
                            })
                            .collect(),
                        archive,
                    })
                }
            })
            .buffered(self.concurrency)
            .try_collect()
            .await
    }
}
