//! Inventory report enumeration
//!
//! Pages through the report table with the server-issued cursor and keeps the
//! rows whose object type has a configured lookup and whose SLA domain passes
//! the filter.

use std::collections::HashSet;

use indexmap::IndexMap;
use tracing::{debug, info};

use crate::{
    cluster::{Client, TableRequest},
    config::ObjectTypeSpec,
    progress::ProgressReporter,
};

use super::{
    JobError,
    schema::{ColumnIndex, ReportColumnSchema, cell_text},
};

/// One report row that survived filtering.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateObject {
    pub object_id: String,
    pub object_type: String,
    pub location: String,
    pub object_name: String,
    pub sla_domain: String,
    pub raw: Vec<serde_json::Value>,
}

impl CandidateObject {
    fn from_row(index: &ColumnIndex, raw: Vec<serde_json::Value>) -> Self {
        Self {
            object_id: cell_text(&raw[index.object_id]),
            object_type: cell_text(&raw[index.object_type]),
            location: cell_text(&raw[index.location]),
            object_name: cell_text(&raw[index.object_name]),
            sla_domain: cell_text(&raw[index.sla_domain]),
            raw,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Enumeration {
    pub schema: ReportColumnSchema,
    pub index: ColumnIndex,
    pub candidates: Vec<CandidateObject>,
    /// Rows seen across all pages, kept or not.
    pub total: usize,
}

/// Row filter: known object type, and SLA domain in the filter set when the
/// set is non-empty.
pub struct CandidateFilter<'a> {
    pub object_types: &'a IndexMap<String, ObjectTypeSpec>,
    pub sla_filter: &'a HashSet<String>,
}

impl CandidateFilter<'_> {
    pub fn accepts(&self, object_type: &str, sla_domain: &str) -> bool {
        self.object_types.contains_key(object_type)
            && (self.sla_filter.is_empty() || self.sla_filter.contains(sla_domain))
    }
}

/// Find the id of the report whose name equals `name` exactly.
pub async fn resolve_report_id<C: Client>(client: &C, name: &str) -> Result<String, JobError<C::Error>> {
    let reports = client
        .find_reports(name)
        .await
        .map_err(JobError::ResolveReport)?;
    let report = reports
        .into_iter()
        .find(|report| report.name == name)
        .ok_or_else(|| JobError::<C::Error>::ReportNotFound(name.to_owned()))?;
    info!(report_id = report.id, name, "resolved report");
    Ok(report.id)
}

pub struct ReportEnumerator<'a, C> {
    pub client: &'a C,
    pub object_types: &'a IndexMap<String, ObjectTypeSpec>,
    pub display_columns: &'a [String],
    pub page_size: u32,
    pub progress: &'a dyn ProgressReporter,
}

impl<C: Client> ReportEnumerator<'_, C> {
    pub async fn enumerate(
        &self,
        report_id: &str,
        sla_filter: &HashSet<String>,
    ) -> Result<Enumeration, JobError<C::Error>> {
        let filter = CandidateFilter {
            object_types: self.object_types,
            sla_filter,
        };
        let mut request = TableRequest {
            limit: self.page_size,
            cursor: None,
        };
        let mut page = self
            .client
            .report_table(report_id, &request)
            .await
            .map_err(JobError::Enumerate)?;
        let schema = ReportColumnSchema::from_page(&page);
        let index = ColumnIndex::resolve(&schema, self.display_columns)?;

        let mut candidates = Vec::new();
        let mut total = 0usize;
        let mut page_number = 1usize;
        loop {
            debug!(
                report_id,
                page = page_number,
                rows = page.data_grid.len(),
                has_more = page.has_more,
                "received report page"
            );
            for raw in std::mem::take(&mut page.data_grid) {
                total += 1;
                index.check_row(total, &raw)?;
                let object_type = cell_text(&raw[index.object_type]);
                let sla_domain = cell_text(&raw[index.sla_domain]);
                if filter.accepts(&object_type, &sla_domain) {
                    candidates.push(CandidateObject::from_row(&index, raw));
                }
                self.progress
                    .set_enumeration_progress(candidates.len(), total);
            }
            if !page.has_more {
                break;
            }
            request.cursor = Some(
                page.cursor
                    .take()
                    .ok_or(JobError::<C::Error>::MissingCursor { page: page_number })?,
            );
            page = self
                .client
                .report_table(report_id, &request)
                .await
                .map_err(JobError::Enumerate)?;
            page_number += 1;
        }
        info!(
            report_id,
            found = candidates.len(),
            total,
            pages = page_number,
            "enumerated report"
        );
        Ok(Enumeration {
            schema,
            index,
            candidates,
            total,
        })
    }
}
