//! Snapshot emitters: JSON, CSV, and TSV.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};

use crate::config::OutputFormat;
use crate::types::Snapshot;

/// Column order of the delimited formats.
pub const HEADER: [&str; 6] = [
    "ResourceType",
    "CompartmentName",
    "ResourceName",
    "OCID",
    "CompartmentID",
    "AdditionalInfo",
];

/// Write the snapshot to `out` in the requested format.
pub fn write_snapshot(snapshot: &Snapshot, format: OutputFormat, out: &mut dyn Write) -> Result<()> {
    match format {
        OutputFormat::Json => write_json(snapshot, out),
        OutputFormat::Csv => write_delimited(snapshot, b',', false, out),
        OutputFormat::Tsv => write_delimited(snapshot, b'\t', true, out),
    }
}

/// Write the snapshot to `path`, or stdout when no path is set.
pub fn emit(snapshot: &Snapshot, format: OutputFormat, path: Option<&Path>) -> Result<()> {
    match path {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("unable to create output file {}", path.display()))?;
            let mut writer = std::io::BufWriter::new(file);
            write_snapshot(snapshot, format, &mut writer)?;
            writer.flush()?;
            Ok(())
        }
        None => {
            let stdout = std::io::stdout();
            let mut lock = stdout.lock();
            write_snapshot(snapshot, format, &mut lock)
        }
    }
}

/// JSON: the array of records, two-space indented, UTF-8 as-is.
fn write_json(snapshot: &Snapshot, out: &mut dyn Write) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, &snapshot.resources)
        .context("unable to serialize snapshot")?;
    writeln!(out)?;
    Ok(())
}

fn write_delimited(
    snapshot: &Snapshot,
    delimiter: u8,
    sanitize: bool,
    out: &mut dyn Write,
) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .from_writer(&mut *out);
    writer.write_record(HEADER)?;

    for record in &snapshot.resources {
        let info = render_additional_info(&record.additional_info);
        let mut cells = [
            record.resource_type.canonical().to_string(),
            record.compartment_name.clone(),
            record.resource_name.clone(),
            record.ocid.clone(),
            record.compartment_id.clone(),
            info,
        ];
        if sanitize {
            for cell in &mut cells {
                *cell = sanitize_cell(cell);
            }
        }
        writer.write_record(&cells)?;
    }
    writer.flush()?;
    Ok(())
}

/// Human-readable `key: value, key: value` rendering of the attribute map.
pub fn render_additional_info(
    info: &std::collections::BTreeMap<String, String>,
) -> String {
    info.iter()
        .map(|(k, v)| format!("{k}: {v}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// TSV cells must not carry tabs or line breaks.
fn sanitize_cell(cell: &str) -> String {
    cell.replace(['\t', '\n', '\r'], " ")
}
