//! Report job orchestration
//!
//! Resolves the report id, enumerates candidates while the cluster topology is
//! resolved, then fans the archive lookups out over the healthy nodes.

use std::collections::HashSet;

use futures::join;
use tracing::{info, warn};

use crate::{
    cluster::Client,
    config::ReportConfig,
    progress::{BatchPhase, ProgressReporter},
};

use super::{
    enumerate::{ReportEnumerator, resolve_report_id},
    lookup::{ArchiveLookupPool, LookupError, ReportRow},
    schema::SchemaError,
    topology::resolve_healthy_nodes,
};

/// Error type for a report run. The message starts with the phase that failed.
#[derive(Debug, thiserror::Error)]
pub enum JobError<E> {
    #[error("resolving report id: {0}")]
    ResolveReport(E),
    #[error("resolving report id: no report named {0:?}")]
    ReportNotFound(String),
    #[error("enumerating: {0}")]
    Enumerate(E),
    #[error("enumerating: {0}")]
    Schema(#[from] SchemaError),
    #[error("enumerating: page {page} has more rows but no cursor")]
    MissingCursor { page: usize },
    #[error("resolving topology: {0}")]
    Topology(E),
    #[error("resolving topology: no healthy nodes")]
    EmptyTopology,
    #[error("resolving topology: invalid node address {address:?}: {error}")]
    NodeAddress {
        address: String,
        error: url::ParseError,
    },
    #[error("looking up archive status of {object_id}: {error}")]
    Lookup {
        object_id: String,
        error: LookupError<E>,
    },
}

/// Row counts of a run. Per-status totals are kept by the progress reporter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportStats {
    /// Report rows seen.
    pub scanned: usize,
    /// Rows kept after filtering.
    pub found: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub header: Vec<String>,
    pub rows: Vec<ReportRow>,
    pub stats: ReportStats,
}

pub struct ReportJob<'a, C> {
    pub client: &'a C,
    pub config: &'a ReportConfig,
    pub progress: &'a dyn ProgressReporter,
}

impl<C: Client> ReportJob<'_, C> {
    /// Run the whole pipeline. An empty `sla_filter` keeps every SLA domain.
    pub async fn run(&self, sla_filter: &HashSet<String>) -> Result<Report, JobError<C::Error>> {
        self.progress.set_phase(BatchPhase::ResolvingReport);
        let report_id = resolve_report_id(self.client, &self.config.report_name).await?;

        self.progress.set_phase(BatchPhase::Enumerating);
        let enumerator = ReportEnumerator {
            client: self.client,
            object_types: &self.config.object_types,
            display_columns: &self.config.display_columns,
            page_size: self.config.page_size,
            progress: self.progress,
        };
        let (enumeration, nodes) = join!(
            enumerator.enumerate(&report_id, sla_filter),
            resolve_healthy_nodes(self.client),
        );
        let enumeration = enumeration?;
        let header = self.config.header();

        self.progress.set_phase(BatchPhase::ResolvingTopology);
        if enumeration.candidates.is_empty() {
            if let Err(error) = nodes {
                warn!(%error, "ignoring topology error, nothing to look up");
                self.progress
                    .log_warn(&format!("ignoring topology error, nothing to look up: {error}"));
            }
            info!(total = enumeration.total, "no objects matched");
            return Ok(Report {
                header,
                rows: Vec::new(),
                stats: ReportStats {
                    scanned: enumeration.total,
                    found: 0,
                },
            });
        }
        let nodes = nodes?;

        let pool = ArchiveLookupPool::new(
            self.client,
            nodes,
            self.config.threads_per_node,
            &self.config.object_types,
            self.config.on_lookup_error,
            self.progress,
        );
        info!(
            objects = enumeration.candidates.len(),
            concurrency = pool.concurrency(),
            "looking up archive status"
        );
        self.progress.set_phase(BatchPhase::LookingUp);
        let rows = pool.run(&enumeration.candidates, &enumeration.index).await?;
        let stats = ReportStats {
            scanned: enumeration.total,
            found: rows.len(),
        };
        Ok(Report {
            header,
            rows,
            stats,
        })
    }
}
