use std::{
    collections::{HashMap, HashSet},
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use serde_json::{Value, json};

use crate::{
    cluster::{self, ClusterNode, ReportSummary, TablePage, TableRequest},
    config::{LookupFailurePolicy, ObjectTypeSpec, ReportConfig},
    job::{
        ArchiveLookupPool, ArchiveStatus, HealthyNodes, JobError, LookupError, ReportEnumerator,
        ReportJob, resolve_healthy_nodes,
    },
    progress::{NullReporter, ProgressReporter},
};


use recorder::{Event, RecordingReporter};

const REPORT_NAME: &str = "Object Protection Summary";
const REPORT_ID: &str = "CustomReport:::4c1f";

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct MemoryError(String);

/// In-memory cluster. Pages are addressed by cursors `page-<n>`.
pub struct MemoryClient {
    entry: url::Url,
    reports: Vec<ReportSummary>,
    columns: Vec<String>,
    pages: Vec<Vec<Vec<Value>>>,
    nodes: Vec<ClusterNode>,
    snapshots: HashMap<String, Value>,
    delays: HashMap<String, Duration>,
    failing: HashSet<String>,
    fail_table: bool,
    /// Answer every page with `hasMore` but no cursor.
    drop_cursor: bool,
    requests: tokio::sync::Mutex<Vec<TableRequest>>,
    lookups: tokio::sync::Mutex<Vec<(url::Url, String)>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MemoryClient {
    fn new(pages: Vec<Vec<Vec<Value>>>) -> Self {
        Self {
            entry: url::Url::parse("https://cluster.example.com").unwrap(),
            reports: vec![
                ReportSummary {
                    id: "CustomReport:::0000".into(),
                    name: format!("{REPORT_NAME} (copy)"),
                },
                ReportSummary {
                    id: REPORT_ID.into(),
                    name: REPORT_NAME.into(),
                },
            ],
            columns: [
                "ObjectId",
                "ObjectName",
                "ObjectType",
                "Location",
                "SlaDomain",
                "ComplianceStatus",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            pages,
            nodes: ["10.0.0.1", "10.0.0.2", "10.0.0.3"]
                .into_iter()
                .map(|ip| ClusterNode {
                    ip_address: ip.into(),
                    status: "OK".into(),
                })
                .collect(),
            snapshots: HashMap::new(),
            delays: HashMap::new(),
            failing: HashSet::new(),
            fail_table: false,
            drop_cursor: false,
            requests: Default::default(),
            lookups: Default::default(),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    fn with_nodes(mut self, nodes: &[(&str, &str)]) -> Self {
        self.nodes = nodes
            .iter()
            .map(|(ip, status)| ClusterNode {
                ip_address: (*ip).into(),
                status: (*status).into(),
            })
            .collect();
        self
    }

    fn with_snapshots(mut self, path: impl Into<String>, body: Value) -> Self {
        self.snapshots.insert(path.into(), body);
        self
    }

    fn with_delay(mut self, path: impl Into<String>, delay: Duration) -> Self {
        self.delays.insert(path.into(), delay);
        self
    }

    fn failing(mut self, path: impl Into<String>) -> Self {
        self.failing.insert(path.into());
        self
    }
}

impl cluster::Client for MemoryClient {
    type Error = MemoryError;

    fn entry_url(&self) -> &url::Url {
        &self.entry
    }

    async fn find_reports(&self, name: &str) -> Result<Vec<ReportSummary>, Self::Error> {
        Ok(self
            .reports
            .iter()
            .filter(|report| report.name.contains(name))
            .cloned()
            .collect())
    }

    async fn report_table(
        &self,
        report_id: &str,
        request: &TableRequest,
    ) -> Result<TablePage, Self::Error> {
        self.requests.lock().await.push(request.clone());
        if self.fail_table {
            return Err(MemoryError("connection reset".into()));
        }
        if report_id != REPORT_ID {
            return Err(MemoryError(format!("no report {report_id}")));
        }
        let number = match &request.cursor {
            None => 0,
            Some(cursor) => cursor
                .strip_prefix("page-")
                .and_then(|n| n.parse::<usize>().ok())
                .ok_or_else(|| MemoryError(format!("bad cursor {cursor}")))?,
        };
        let has_more = self.drop_cursor || number + 1 < self.pages.len();
        Ok(TablePage {
            columns: self.columns.clone(),
            data_grid: self
                .pages
                .get(number)
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .take(request.limit as usize)
                .collect(),
            cursor: (has_more && !self.drop_cursor).then(|| format!("page-{}", number + 1)),
            has_more,
        })
    }

    async fn nodes(&self) -> Result<Vec<ClusterNode>, Self::Error> {
        Ok(self.nodes.clone())
    }

    async fn snapshots(&self, node: &url::Url, path: &str) -> Result<Value, Self::Error> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.lookups
            .lock()
            .await
            .push((node.clone(), path.to_owned()));
        if let Some(delay) = self.delays.get(path) {
            tokio::time::sleep(*delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.failing.contains(path) {
            return Err(MemoryError(format!("timed out fetching {path}")));
        }
        self.snapshots
            .get(path)
            .cloned()
            .ok_or_else(|| MemoryError(format!("404 {path}")))
    }
}

fn row(id: &str, name: &str, object_type: &str, location: &str, sla: &str) -> Vec<Value> {
    vec![
        json!(id),
        json!(name),
        json!(object_type),
        json!(location),
        json!(sla),
        json!("InCompliance"),
    ]
}

fn sla(domains: &[&str]) -> HashSet<String> {
    domains.iter().map(|d| (*d).to_owned()).collect()
}

fn archived(date: &str) -> Value {
    json!({ "data": [
        { "date": "2019-07-01T00:00:00.000Z", "cloudState": 0 },
        { "date": date, "cloudState": 2 },
    ]})
}

fn not_archived() -> Value {
    json!({ "data": [{ "date": "2019-07-01T00:00:00.000Z", "cloudState": 0 }] })
}

fn ids<'a>(rows: impl IntoIterator<Item = &'a crate::job::ReportRow>) -> Vec<&'a str> {
    rows.into_iter().map(|row| row.object_id.as_str()).collect()
}

#[tokio::test]
async fn test_end_to_end_scenario() {
    let client = MemoryClient::new(vec![vec![
        row("a", "master", "Mssql", "SQL01\\MSSQLSERVER", "Gold"),
        row("b", "/home", "LinuxFileset", "10.1.1.1", "Silver"),
        row("c", "vg0", "UnknownType", "host", "Gold"),
    ]])
    .with_snapshots("v1/mssql/db/a/snapshot", archived("2019-05-31T19:24:43.000Z"))
    .with_snapshots(
        "v1/fileset/b",
        json!({ "snapshots": [{ "date": "2019-06-01T00:00:00.000Z", "cloudState": 0 }] }),
    );
    let mut config = ReportConfig::default();
    config.object_types.retain(|name, _| name == "Mssql" || name == "LinuxFileset");

    let enumerator = ReportEnumerator {
        client: &client,
        object_types: &config.object_types,
        display_columns: &config.display_columns,
        page_size: config.page_size,
        progress: &NullReporter,
    };
    let enumeration = enumerator.enumerate(REPORT_ID, &HashSet::new()).await.unwrap();
    assert_eq!(enumeration.total, 3);
    assert_eq!(
        enumeration
            .candidates
            .iter()
            .map(|c| c.object_id.as_str())
            .collect::<Vec<_>>(),
        ["a", "b"]
    );

    let job = ReportJob {
        client: &client,
        config: &config,
        progress: &NullReporter,
    };
    let report = job.run(&HashSet::new()).await.unwrap();
    assert_eq!(
        report.header,
        ["Location", "ObjectName", "ObjectType", "SlaDomain", "ArchiveDate"]
    );
    assert_eq!(ids(&report.rows), ["a", "b"]);
    assert_eq!(
        report.rows[0].cells().collect::<Vec<_>>(),
        [
            "SQL01\\MSSQLSERVER",
            "master",
            "Mssql",
            "Gold",
            "2019-05-31T19:24:43.000Z"
        ]
    );
    assert_eq!(
        report.rows[1].cells().collect::<Vec<_>>(),
        ["10.1.1.1", "/home", "LinuxFileset", "Silver", "None"]
    );
    assert_eq!(report.stats.scanned, 3);
    assert_eq!(report.stats.found, 2);
}

#[tokio::test]
async fn test_rows_keep_input_order_under_variable_latency() {
    let count = 24;
    let mut client = MemoryClient::new(vec![
        (0..count)
            .map(|i| row(&format!("db-{i}"), "db", "Mssql", "host", "Gold"))
            .collect(),
    ]);
    for i in 0..count {
        let path = format!("v1/mssql/db/db-{i}/snapshot");
        // earlier objects answer slower, so completion order is reversed
        client = client
            .with_delay(&path, Duration::from_millis(((count - i) * 3) as u64))
            .with_snapshots(&path, archived(&format!("2019-05-{:02}T00:00:00.000Z", i + 1)));
    }
    let config = ReportConfig {
        threads_per_node: 2,
        ..Default::default()
    };
    let job = ReportJob {
        client: &client,
        config: &config,
        progress: &NullReporter,
    };
    let report = job.run(&HashSet::new()).await.unwrap();

    let expected = (0..count).map(|i| format!("db-{i}")).collect::<Vec<_>>();
    assert_eq!(ids(&report.rows), expected);
    for (i, row) in report.rows.iter().enumerate() {
        assert_eq!(
            row.archive,
            ArchiveStatus::Archived(format!("2019-05-{:02}T00:00:00.000Z", i + 1))
        );
    }

    let max = client.max_in_flight.load(Ordering::SeqCst);
    assert!(max <= 3 * 2, "{max} lookups in flight");
    assert!(max > 1, "lookups never overlapped");
}

#[tokio::test]
async fn test_empty_input_produces_no_rows() {
    let client = MemoryClient::new(vec![vec![]]);
    let config = ReportConfig::default();
    let job = ReportJob {
        client: &client,
        config: &config,
        progress: &NullReporter,
    };
    let report = job.run(&HashSet::new()).await.unwrap();
    assert!(report.rows.is_empty());
    assert_eq!(report.stats.scanned, 0);
    assert_eq!(report.header.len(), 5);
    assert!(client.lookups.lock().await.is_empty());
}

#[tokio::test]
async fn test_pagination_reads_every_page() {
    let types = ["Mssql", "LinuxFileset", "WindowsVolumeGroup"];
    let mut n = 0;
    let pages: Vec<Vec<Vec<Value>>> = [100, 100, 37]
        .into_iter()
        .map(|size| {
            (0..size)
                .map(|_| {
                    n += 1;
                    row(&format!("obj-{n}"), "x", types[n % 3], "host", "Gold")
                })
                .collect::<Vec<_>>()
        })
        .collect();
    let client = MemoryClient::new(pages);
    let config = ReportConfig::default();
    let recorder = RecordingReporter::default();
    let enumerator = ReportEnumerator {
        client: &client,
        object_types: &config.object_types,
        display_columns: &config.display_columns,
        page_size: config.page_size,
        progress: &recorder,
    };
    let enumeration = enumerator.enumerate(REPORT_ID, &HashSet::new()).await.unwrap();

    assert_eq!(enumeration.total, 237);
    assert!(enumeration.candidates.len() <= 237);
    // one in three rows carries an unconfigured type
    assert_eq!(enumeration.candidates.len(), 237 - 79);

    let requests = client.requests.lock().await;
    assert_eq!(
        requests
            .iter()
            .map(|r| (r.limit, r.cursor.clone()))
            .collect::<Vec<_>>(),
        [
            (100, None),
            (100, Some("page-1".to_owned())),
            (100, Some("page-2".to_owned())),
        ]
    );

    let progress = recorder.enumeration();
    assert_eq!(progress.len(), 237);
    assert!(progress.windows(2).all(|w| w[0].0 <= w[1].0 && w[0].1 < w[1].1));
    assert_eq!(progress.last(), Some(&(237 - 79, 237)));
}

#[tokio::test]
async fn test_sla_filter() {
    let client = MemoryClient::new(vec![vec![
        row("a", "a", "Mssql", "h", "Gold"),
        row("b", "b", "Mssql", "h", "Bronze"),
        row("c", "c", "ManagedVolume", "h", "Silver"),
        row("d", "d", "UnknownType", "h", "Gold"),
        row("e", "e", "VmwareVirtualMachine", "h", "Gold"),
    ]]);
    let config = ReportConfig::default();
    let enumerator = ReportEnumerator {
        client: &client,
        object_types: &config.object_types,
        display_columns: &config.display_columns,
        page_size: config.page_size,
        progress: &NullReporter,
    };
    let enumeration = enumerator
        .enumerate(REPORT_ID, &sla(&["Gold", "Silver"]))
        .await
        .unwrap();
    assert_eq!(
        enumeration
            .candidates
            .iter()
            .map(|c| c.object_id.as_str())
            .collect::<Vec<_>>(),
        ["a", "c", "e"]
    );
    assert_eq!(enumeration.total, 5);
}

#[tokio::test]
async fn test_sla_filter_matching_nothing_yields_header_only() {
    let client = MemoryClient::new(vec![vec![row("a", "a", "Mssql", "h", "Gold")]]);
    let config = ReportConfig::default();
    let job = ReportJob {
        client: &client,
        config: &config,
        progress: &NullReporter,
    };
    let report = job.run(&sla(&["Platinum"])).await.unwrap();
    assert!(report.rows.is_empty());
    assert_eq!(report.stats.scanned, 1);
}

#[tokio::test]
async fn test_topology_error_is_reported_when_nothing_to_look_up() {
    let client = MemoryClient::new(vec![vec![row("a", "a", "Mssql", "h", "Gold")]])
        .with_nodes(&[("10.0.0.1", "DEGRADED")]);
    let config = ReportConfig::default();
    let recorder = RecordingReporter::default();
    let job = ReportJob {
        client: &client,
        config: &config,
        progress: &recorder,
    };
    let report = job.run(&sla(&["Platinum"])).await.unwrap();
    assert!(report.rows.is_empty());
    let warnings = recorder.warnings();
    assert_eq!(warnings.len(), 1);
    assert!(
        warnings[0].ends_with("resolving topology: no healthy nodes"),
        "{warnings:?}"
    );
}

#[tokio::test]
async fn test_more_rows_without_cursor_stops_paging() {
    let mut client = MemoryClient::new(vec![vec![row("a", "a", "Mssql", "h", "Gold")]]);
    client.drop_cursor = true;
    let config = ReportConfig::default();
    let enumerator = ReportEnumerator {
        client: &client,
        object_types: &config.object_types,
        display_columns: &config.display_columns,
        page_size: config.page_size,
        progress: &NullReporter,
    };
    let error = enumerator
        .enumerate(REPORT_ID, &HashSet::new())
        .await
        .unwrap_err();
    assert!(matches!(error, JobError::MissingCursor { page: 1 }));
    assert!(error.to_string().starts_with("enumerating:"), "{error}");
    assert_eq!(client.requests.lock().await.len(), 1);
}

#[tokio::test]
async fn test_topology_excludes_unhealthy_nodes() {
    let client = MemoryClient::new(vec![]).with_nodes(&[
        ("10.0.0.1", "OK"),
        ("10.0.0.2", "OK"),
        ("10.0.0.3", "DEGRADED"),
    ]);
    let nodes = resolve_healthy_nodes(&client).await.unwrap();
    assert_eq!(nodes.len(), 2);
    assert_eq!(
        nodes.urls().iter().map(|u| u.as_str()).collect::<Vec<_>>(),
        ["https://10.0.0.1/", "https://10.0.0.2/"]
    );
}

#[tokio::test]
async fn test_lookups_only_hit_healthy_nodes() {
    let mut client = MemoryClient::new(vec![
        (0..30)
            .map(|i| row(&format!("vm-{i}"), "vm", "VmwareVirtualMachine", "esx", "Gold"))
            .collect(),
    ])
    .with_nodes(&[
        ("10.0.0.1", "OK"),
        ("10.0.0.2", "FAILED"),
        ("10.0.0.3", "OK"),
    ]);
    for i in 0..30 {
        client = client.with_snapshots(format!("v1/vmware/vm/vm-{i}/snapshot"), not_archived());
    }
    let config = ReportConfig::default();
    let job = ReportJob {
        client: &client,
        config: &config,
        progress: &NullReporter,
    };
    let report = job.run(&HashSet::new()).await.unwrap();
    assert_eq!(report.rows.len(), 30);

    let lookups = client.lookups.lock().await;
    assert_eq!(lookups.len(), 30);
    assert!(
        lookups
            .iter()
            .all(|(node, _)| node.host_str() != Some("10.0.0.2"))
    );
}

#[test]
fn test_concurrency_saturates_on_huge_thread_count() {
    let client = MemoryClient::new(vec![]);
    let config = ReportConfig::default();
    let nodes = HealthyNodes::new(vec![
        url::Url::parse("https://10.0.0.1").unwrap(),
        url::Url::parse("https://10.0.0.2").unwrap(),
    ])
    .unwrap();
    let pool = ArchiveLookupPool::new(
        &client,
        nodes,
        usize::MAX,
        &config.object_types,
        config.on_lookup_error,
        &NullReporter,
    );
    assert_eq!(pool.concurrency(), usize::MAX);
}

#[tokio::test]
async fn test_empty_topology_is_fatal() {
    let client = MemoryClient::new(vec![vec![row("a", "a", "Mssql", "h", "Gold")]])
        .with_nodes(&[("10.0.0.1", "DEGRADED")]);
    let config = ReportConfig::default();
    let job = ReportJob {
        client: &client,
        config: &config,
        progress: &NullReporter,
    };
    let error = job.run(&HashSet::new()).await.unwrap_err();
    assert!(matches!(error, JobError::EmptyTopology));
    assert!(error.to_string().starts_with("resolving topology"));
}

#[tokio::test]
async fn test_missing_report_is_configuration_error() {
    let mut client = MemoryClient::new(vec![vec![]]);
    client.reports.retain(|report| report.name != REPORT_NAME);
    let config = ReportConfig::default();
    let job = ReportJob {
        client: &client,
        config: &config,
        progress: &NullReporter,
    };
    let error = job.run(&HashSet::new()).await.unwrap_err();
    assert!(matches!(&error, JobError::ReportNotFound(name) if name == REPORT_NAME));
    assert!(client.requests.lock().await.is_empty());
}

#[tokio::test]
async fn test_enumeration_failure_aborts_run() {
    let mut client = MemoryClient::new(vec![vec![row("a", "a", "Mssql", "h", "Gold")]]);
    client.fail_table = true;
    let config = ReportConfig::default();
    let job = ReportJob {
        client: &client,
        config: &config,
        progress: &NullReporter,
    };
    let error = job.run(&HashSet::new()).await.unwrap_err();
    assert!(matches!(error, JobError::Enumerate(_)));
    assert_eq!(error.to_string(), "enumerating: connection reset");
    assert!(client.lookups.lock().await.is_empty());
}

#[tokio::test]
async fn test_missing_required_column() {
    let mut client = MemoryClient::new(vec![vec![]]);
    client.columns.retain(|column| column != "SlaDomain");
    let config = ReportConfig::default();
    let job = ReportJob {
        client: &client,
        config: &config,
        progress: &NullReporter,
    };
    let error = job.run(&HashSet::new()).await.unwrap_err();
    assert_eq!(
        error.to_string(),
        "enumerating: column \"SlaDomain\" missing from report schema"
    );
}

fn failing_client() -> MemoryClient {
    MemoryClient::new(vec![vec![
        row("a", "a", "Mssql", "h", "Gold"),
        row("b", "b", "Mssql", "h", "Gold"),
        row("c", "c", "Mssql", "h", "Gold"),
    ]])
    .with_nodes(&[("10.0.0.1", "OK")])
    .with_snapshots("v1/mssql/db/a/snapshot", not_archived())
    .failing("v1/mssql/db/b/snapshot")
    .with_snapshots("v1/mssql/db/c/snapshot", archived("2019-05-31T19:24:43.000Z"))
}

#[tokio::test]
async fn test_failed_lookup_is_recorded_per_row() {
    let client = failing_client();
    let config = ReportConfig::default();
    let recorder = RecordingReporter::default();
    let job = ReportJob {
        client: &client,
        config: &config,
        progress: &recorder,
    };
    let report = job.run(&HashSet::new()).await.unwrap();
    assert_eq!(ids(&report.rows), ["a", "b", "c"]);
    assert_eq!(report.rows[0].archive, ArchiveStatus::NotArchived);
    assert_eq!(
        report.rows[1].archive,
        ArchiveStatus::LookupFailed("timed out fetching v1/mssql/db/b/snapshot".into())
    );
    assert_eq!(
        report.rows[2].archive,
        ArchiveStatus::Archived("2019-05-31T19:24:43.000Z".into())
    );
    assert_eq!(report.stats.found, 3);

    let completed = recorder.lookups();
    assert_eq!(completed.len(), 3);
    let mut sorted = completed.clone();
    sorted.sort();
    assert_eq!(completed, sorted);
    assert_eq!(completed.last(), Some(&(3, 3)));
}

#[tokio::test]
async fn test_failed_lookup_aborts_under_abort_policy() {
    let client = failing_client();
    let config = ReportConfig {
        on_lookup_error: LookupFailurePolicy::Abort,
        ..Default::default()
    };
    let job = ReportJob {
        client: &client,
        config: &config,
        progress: &NullReporter,
    };
    let error = job.run(&HashSet::new()).await.unwrap_err();
    assert!(matches!(
        &error,
        JobError::Lookup { object_id, error: LookupError::Transport(_) } if object_id == "b"
    ));
    assert!(error.to_string().starts_with("looking up archive status of b"));
}

#[tokio::test]
async fn test_custom_object_type_table() {
    let client = MemoryClient::new(vec![vec![row(
        "VolumeGroup:::9",
        "vg",
        "WindowsVolumeGroup",
        "win01",
        "Gold",
    )]])
    .with_snapshots(
        "internal/volume_group/VolumeGroup:::9/snapshot",
        archived("2019-06-30T01:02:03.000Z"),
    );
    let mut config = ReportConfig::default();
    config.object_types.insert(
        "WindowsVolumeGroup".into(),
        ObjectTypeSpec::new("internal/volume_group/{id}/snapshot", "data"),
    );
    let job = ReportJob {
        client: &client,
        config: &config,
        progress: &NullReporter,
    };
    let report = job.run(&HashSet::new()).await.unwrap();
    assert_eq!(
        report.rows[0].archive,
        ArchiveStatus::Archived("2019-06-30T01:02:03.000Z".into())
    );
}

#[tokio::test]
async fn test_phases_in_order() {
    let client = failing_client();
    let config = ReportConfig::default();
    let recorder = RecordingReporter::default();
    let job = ReportJob {
        client: &client,
        config: &config,
        progress: &recorder as &dyn ProgressReporter,
    };
    job.run(&HashSet::new()).await.unwrap();
    let phases = recorder
        .events()
        .into_iter()
        .filter_map(|event| match event {
            Event::Phase(phase) => Some(phase),
            _ => None,
        })
        .collect::<Vec<_>>();
    use crate::progress::BatchPhase::*;
    assert_eq!(
        phases,
        [ResolvingReport, Enumerating, ResolvingTopology, LookingUp]
    );
}
