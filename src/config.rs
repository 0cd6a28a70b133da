use std::time::Duration;

use indexmap::IndexMap;
use serde::Deserialize;

/// Placeholder substituted with the object id in [`ObjectTypeSpec::lookup_path`].
pub const OBJECT_ID_PLACEHOLDER: &str = "{id}";

/// How to reach the archive status of one object type.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ObjectTypeSpec {
    /// Path below `/api/`, containing `{id}`.
    pub lookup_path: String,
    /// Name of the snapshot array in the lookup response.
    pub array: String,
}

impl ObjectTypeSpec {
    pub fn new(lookup_path: impl Into<String>, array: impl Into<String>) -> Self {
        Self {
            lookup_path: lookup_path.into(),
            array: array.into(),
        }
    }

    pub fn path_for(&self, object_id: &str) -> String {
        self.lookup_path.replace(OBJECT_ID_PLACEHOLDER, object_id)
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LookupFailurePolicy {
    /// Keep going and mark the row as failed.
    #[default]
    Record,
    /// Abort the whole run on the first failed lookup.
    Abort,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct Timeouts {
    /// Seconds per report table page.
    pub report: u64,
    /// Seconds for the report list and node list calls.
    pub topology: u64,
    /// Seconds per archive lookup.
    pub lookup: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            report: 60,
            topology: 15,
            lookup: 30,
        }
    }
}

impl Timeouts {
    pub fn report(&self) -> Duration {
        Duration::from_secs(self.report)
    }

    pub fn topology(&self) -> Duration {
        Duration::from_secs(self.topology)
    }

    pub fn lookup(&self) -> Duration {
        Duration::from_secs(self.lookup)
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ReportConfig {
    pub report_name: String,
    pub page_size: u32,
    pub threads_per_node: usize,
    pub display_columns: Vec<String>,
    pub archive_column: String,
    pub timeouts: Timeouts,
    pub on_lookup_error: LookupFailurePolicy,
    pub object_types: IndexMap<String, ObjectTypeSpec>,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            report_name: "Object Protection Summary".into(),
            page_size: 100,
            threads_per_node: 4,
            display_columns: ["Location", "ObjectName", "ObjectType", "SlaDomain"]
                .into_iter()
                .map(String::from)
                .collect(),
            archive_column: "ArchiveDate".into(),
            timeouts: Timeouts::default(),
            on_lookup_error: LookupFailurePolicy::default(),
            object_types: default_object_types(),
        }
    }
}

pub fn default_object_types() -> IndexMap<String, ObjectTypeSpec> {
    let fileset = ObjectTypeSpec::new("v1/fileset/{id}", "snapshots");
    IndexMap::from([
        (
            "VmwareVirtualMachine".into(),
            ObjectTypeSpec::new("v1/vmware/vm/{id}/snapshot", "data"),
        ),
        (
            "Mssql".into(),
            ObjectTypeSpec::new("v1/mssql/db/{id}/snapshot", "data"),
        ),
        ("LinuxFileset".into(), fileset.clone()),
        ("WindowsFileset".into(), fileset.clone()),
        ("ShareFileset".into(), fileset),
        (
            "ManagedVolume".into(),
            ObjectTypeSpec::new("internal/managed_volume/{id}/snapshot", "data"),
        ),
    ])
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("page_size must be positive")]
    ZeroPageSize,
    #[error("threads_per_node must be positive")]
    ZeroThreadsPerNode,
    #[error("no object types configured")]
    NoObjectTypes,
    #[error("lookup path for {object_type} has no {{id}} placeholder")]
    MissingPlaceholder { object_type: String },
}

impl ReportConfig {
    pub fn from_yaml(src: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(src)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.page_size == 0 {
            return Err(ValidationError::ZeroPageSize);
        }
        if self.threads_per_node == 0 {
            return Err(ValidationError::ZeroThreadsPerNode);
        }
        if self.object_types.is_empty() {
            return Err(ValidationError::NoObjectTypes);
        }
        if let Some((object_type, _)) = self
            .object_types
            .iter()
            .find(|(_, spec)| !spec.lookup_path.contains(OBJECT_ID_PLACEHOLDER))
        {
            return Err(ValidationError::MissingPlaceholder {
                object_type: object_type.clone(),
            });
        }
        Ok(())
    }

    /// Header of the emitted report: display columns, then the archive column.
    pub fn header(&self) -> Vec<String> {
        let mut header = self.display_columns.clone();
        header.push(self.archive_column.clone());
        header
    }
}
