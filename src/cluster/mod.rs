//! Cluster REST API surface
//!
//! This module defines the wire types exchanged with the backup cluster and the
//! [`Client`] trait that the reporting job is written against. The HTTP
//! implementation lives in [`http`].

use base64::Engine as _;
use serde::{Deserialize, Serialize};

pub mod http;

/// Resolved credentials, kept as a ready-to-send `Authorization` header value.
#[derive(Clone)]
pub struct AuthContext {
    header: String,
}

impl AuthContext {
    pub fn basic(username: &str, password: &str) -> Self {
        let encoded =
            base64::engine::general_purpose::STANDARD.encode(format!("{username}:{password}"));
        Self {
            header: format!("Basic {encoded}"),
        }
    }

    pub fn header(&self) -> &str {
        &self.header
    }
}

impl std::fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AuthContext(<redacted>)")
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ReportSummary {
    pub id: String,
    pub name: String,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DataList<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct TableRequest {
    pub limit: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

/// One page of the inventory report table.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TablePage {
    pub columns: Vec<String>,
    #[serde(default)]
    pub data_grid: Vec<Vec<serde_json::Value>>,
    #[serde(default)]
    pub cursor: Option<String>,
    pub has_more: bool,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterNode {
    pub ip_address: String,
    pub status: String,
}

impl ClusterNode {
    pub fn is_healthy(&self) -> bool {
        self.status == "OK"
    }
}

/// Access to the cluster endpoints used by the report job.
///
/// Lookups are addressed at an explicit node base URL so the caller can spread
/// them across the cluster; every other call goes to the entry node.
pub trait Client: Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Entry URL the client was built for. Node URLs inherit its scheme.
    fn entry_url(&self) -> &url::Url;

    fn find_reports(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<Vec<ReportSummary>, Self::Error>> + Send;

    fn report_table(
        &self,
        report_id: &str,
        request: &TableRequest,
    ) -> impl Future<Output = Result<TablePage, Self::Error>> + Send;

    fn nodes(&self) -> impl Future<Output = Result<Vec<ClusterNode>, Self::Error>> + Send;

    /// Fetch `/api/{path}` from `node` and return the raw JSON body.
    fn snapshots(
        &self,
        node: &url::Url,
        path: &str,
    ) -> impl Future<Output = Result<serde_json::Value, Self::Error>> + Send;
}
