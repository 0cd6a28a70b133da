use std::time::Duration;

use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, InvalidHeaderValue};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::Timeouts;

use super::{AuthContext, ClusterNode, DataList, ReportSummary, TablePage, TableRequest};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("transport error: {0}")]
    Transport(reqwest::Error),
    #[error("{url} responded with {status}")]
    Status {
        url: url::Url,
        status: reqwest::StatusCode,
    },
    #[error("failed to decode response from {url}: {error}")]
    Decode { url: url::Url, error: reqwest::Error },
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("invalid authorization header: {0}")]
    Header(#[from] InvalidHeaderValue),
}

pub struct Client {
    entry: url::Url,
    timeouts: Timeouts,
    client: reqwest::Client,
}

impl Client {
    /// Build a client for the cluster reachable at `entry`.
    ///
    /// `insecure` accepts self-signed certificates, which is how clusters ship.
    pub fn new(
        entry: url::Url,
        auth: &AuthContext,
        timeouts: Timeouts,
        insecure: bool,
    ) -> Result<Self, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let mut authorization = HeaderValue::from_str(auth.header())?;
        authorization.set_sensitive(true);
        headers.insert(AUTHORIZATION, authorization);
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .danger_accept_invalid_certs(insecure)
            .build()
            .map_err(Error::Transport)?;
        Ok(Self {
            entry,
            timeouts,
            client,
        })
    }

    /// `{base}/api/{path}`, keeping any path prefix of `base`.
    fn api_url(base: &url::Url, path: &str) -> Result<url::Url, Error> {
        let mut base = base.clone();
        if !base.path().ends_with('/') {
            base.set_path(&format!("{}/", base.path()));
        }
        Ok(base.join(&format!("api/{}", path.trim_start_matches('/')))?)
    }

    async fn receive<T: DeserializeOwned>(
        url: url::Url,
        request: reqwest::RequestBuilder,
        timeout: Duration,
    ) -> Result<T, Error> {
        let response = request
            .timeout(timeout)
            .send()
            .await
            .map_err(Error::Transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Status { url, status });
        }
        response
            .json::<T>()
            .await
            .map_err(|error| Error::Decode { url, error })
    }
}

impl super::Client for Client {
    type Error = Error;

    fn entry_url(&self) -> &url::Url {
        &self.entry
    }

    async fn find_reports(&self, name: &str) -> Result<Vec<ReportSummary>, Self::Error> {
        let mut url = Self::api_url(&self.entry, "internal/report")?;
        url.query_pairs_mut().append_pair("name", name);
        debug!(%url, "list reports");
        let request = self.client.get(url.clone());
        let reports: DataList<ReportSummary> =
            Self::receive(url, request, self.timeouts.topology()).await?;
        Ok(reports.data)
    }

    async fn report_table(
        &self,
        report_id: &str,
        request: &TableRequest,
    ) -> Result<TablePage, Self::Error> {
        let url = Self::api_url(&self.entry, &format!("internal/report/{report_id}/table"))?;
        let builder = self.client.post(url.clone()).json(request);
        Self::receive(url, builder, self.timeouts.report()).await
    }

    async fn nodes(&self) -> Result<Vec<ClusterNode>, Self::Error> {
        let url = Self::api_url(&self.entry, "internal/node")?;
        let request = self.client.get(url.clone());
        let nodes: DataList<ClusterNode> =
            Self::receive(url, request, self.timeouts.topology()).await?;
        Ok(nodes.data)
    }

    async fn snapshots(
        &self,
        node: &url::Url,
        path: &str,
    ) -> Result<serde_json::Value, Self::Error> {
        let url = Self::api_url(node, path)?;
        let request = self.client.get(url.clone());
        Self::receive(url, request, self.timeouts.lookup()).await
    }
}
