//! Report job
//!
//! This module implements the fetch-and-aggregate pipeline: report enumeration,
//! topology resolution, and the archive lookup pool.

mod enumerate;
mod executor;
mod lookup;
pub mod schema;
mod topology;

pub use enumerate::{
    CandidateFilter, CandidateObject, Enumeration, ReportEnumerator, resolve_report_id,
};
pub use executor::{JobError, Report, ReportJob, ReportStats};
pub use lookup::{ArchiveLookupPool, ArchiveStatus, LookupError, ReportRow, SnapshotError, first_archived};
pub use topology::{HealthyNodes, node_url, resolve_healthy_nodes};
