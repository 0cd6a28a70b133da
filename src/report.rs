//! Report output
//!
//! Writes the header and rows produced by the report job, preserving column and
//! row order. Files are written next to their destination and renamed into
//! place, so a failed run never leaves a partial report behind.

use std::{
    io::Write,
    path::{Path, PathBuf},
};

use crate::job::{Report, ReportRow};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to write {path}: {error}")]
    Io {
        path: PathBuf,
        error: std::io::Error,
    },
    #[error("failed to encode csv: {0}")]
    Csv(#[from] csv::Error),
    #[error("failed to encode json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to write output: {0}")]
    Write(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Csv,
    Jsonl,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Jsonl => "jsonl",
        }
    }
}

/// `rubrik_archive_report_<YYYYmmdd-HHMMSS>.<ext>`
pub fn default_file_name<Tz>(now: chrono::DateTime<Tz>, format: OutputFormat) -> String
where
    Tz: chrono::TimeZone,
    Tz::Offset: std::fmt::Display,
{
    format!(
        "rubrik_archive_report_{}.{}",
        now.format("%Y%m%d-%H%M%S"),
        format.extension()
    )
}

/// Write a header line and one line per row, every field quoted.
pub fn write_csv<W: Write>(writer: W, header: &[String], rows: &[ReportRow]) -> Result<(), Error> {
    let mut writer = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Always)
        .from_writer(writer);
    writer.write_record(header)?;
    for row in rows {
        writer.write_record(row.cells())?;
    }
    writer.flush()?;
    Ok(())
}

/// Write one JSON object per row, keyed by header name in header order.
pub fn write_json_lines<W: Write>(
    mut writer: W,
    header: &[String],
    rows: &[ReportRow],
) -> Result<(), Error> {
    for row in rows {
        let object = header
            .iter()
            .cloned()
            .zip(row.cells().map(serde_json::Value::String))
            .collect::<serde_json::Map<_, _>>();
        serde_json::to_writer(&mut writer, &object)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_report<W: Write>(writer: W, format: OutputFormat, report: &Report) -> Result<(), Error> {
    match format {
        OutputFormat::Csv => write_csv(writer, &report.header, &report.rows),
        OutputFormat::Jsonl => write_json_lines(writer, &report.header, &report.rows),
    }
}

/// Write `report` to `path`, going through a temporary sibling file.
pub fn write_file(path: &Path, format: OutputFormat, report: &Report) -> Result<(), Error> {
    let io_error = |error| Error::Io {
        path: path.to_owned(),
        error,
    };
    let mut partial = path.as_os_str().to_owned();
    partial.push(".partial");
    let partial = PathBuf::from(partial);
    let file = std::fs::File::create(&partial).map_err(io_error)?;
    let written = write_report(std::io::BufWriter::new(file), format, report);
    if let Err(error) = written {
        let _ = std::fs::remove_file(&partial);
        return Err(error);
    }
    std::fs::rename(&partial, path).map_err(io_error)
}
