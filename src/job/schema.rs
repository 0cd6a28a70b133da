//! Column schema of the inventory report
//!
//! The first page of the report names its columns. They are resolved once into
//! a [`ColumnIndex`] and every row of every page is decoded through it.

use std::collections::HashMap;

use crate::cluster::TablePage;

pub const OBJECT_ID: &str = "ObjectId";
pub const OBJECT_TYPE: &str = "ObjectType";
pub const OBJECT_NAME: &str = "ObjectName";
pub const LOCATION: &str = "Location";
pub const SLA_DOMAIN: &str = "SlaDomain";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportColumnSchema {
    positions: HashMap<String, usize>,
}

impl ReportColumnSchema {
    pub fn new(columns: Vec<String>) -> Self {
        let mut positions = HashMap::with_capacity(columns.len());
        for (index, name) in columns.into_iter().enumerate() {
            // first occurrence wins, like a linear index-of scan
            positions.entry(name).or_insert(index);
        }
        Self { positions }
    }

    pub fn from_page(page: &TablePage) -> Self {
        Self::new(page.columns.clone())
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.positions.get(name).copied()
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("column {0:?} missing from report schema")]
    MissingColumn(String),
    #[error("row {row} has {len} cells, schema needs {needed}")]
    ShortRow { row: usize, len: usize, needed: usize },
}

/// Positions of every column the job reads, resolved once per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnIndex {
    pub object_id: usize,
    pub object_type: usize,
    pub object_name: usize,
    pub location: usize,
    pub sla_domain: usize,
    pub display: Vec<usize>,
    width: usize,
}

impl ColumnIndex {
    pub fn resolve(
        schema: &ReportColumnSchema,
        display_columns: &[String],
    ) -> Result<Self, SchemaError> {
        let position = |name: &str| {
            schema
                .position(name)
                .ok_or_else(|| SchemaError::MissingColumn(name.to_owned()))
        };
        let display = display_columns
            .iter()
            .map(|name| position(name))
            .collect::<Result<Vec<_>, _>>()?;
        let object_id = position(OBJECT_ID)?;
        let object_type = position(OBJECT_TYPE)?;
        let object_name = position(OBJECT_NAME)?;
        let location = position(LOCATION)?;
        let sla_domain = position(SLA_DOMAIN)?;
        let width = display
            .iter()
            .chain([&object_id, &object_type, &object_name, &location, &sla_domain])
            .max()
            .map_or(0, |max| max + 1);
        Ok(Self {
            object_id,
            object_type,
            object_name,
            location,
            sla_domain,
            display,
            width,
        })
    }

    /// Check that `cells` is long enough for every resolved position.
    pub fn check_row(&self, row: usize, cells: &[serde_json::Value]) -> Result<(), SchemaError> {
        if cells.len() < self.width {
            return Err(SchemaError::ShortRow {
                row,
                len: cells.len(),
                needed: self.width,
            });
        }
        Ok(())
    }
}

/// Text of a report cell. Strings pass through, `null` becomes empty.
pub fn cell_text(cell: &serde_json::Value) -> String {
    match cell {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}
