//! Quad loading for the `graphstats` tool.
//!
//! Input is line based: `subject property object chunk`, separated by
//! whitespace. Resource ids are decimal or `0x`-prefixed hex. Blank lines and
//! lines starting with `#` are skipped.

use std::io::BufRead;

use anyhow::{bail, Context, Result};
use graphstats_db::StatisticsDatabase;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quad {
    pub subject: u64,
    pub property: u64,
    pub object: u64,
    pub chunk: u16,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub lines: u64,
    pub quads: u64,
    pub chunk_sizes: Vec<u64>,
}

pub fn parse_resource(text: &str) -> Result<u64> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.with_context(|| format!("invalid resource id `{text}`"))
}

/// Returns `None` for blank and comment lines.
pub fn parse_quad(line: &str) -> Result<Option<Quad>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let fields: Vec<&str> = line.split_whitespace().collect();
    let [subject, property, object, chunk] = fields.as_slice() else {
        bail!("expected `subject property object chunk`, found {} fields", fields.len());
    };
    Ok(Some(Quad {
        subject: parse_resource(subject)?,
        property: parse_resource(property)?,
        object: parse_resource(object)?,
        chunk: chunk
            .parse()
            .with_context(|| format!("invalid chunk `{chunk}`"))?,
    }))
}

/// Counts every quad read from `reader` and flushes the database.
pub fn ingest(db: &mut StatisticsDatabase, reader: impl BufRead) -> Result<IngestReport> {
    let mut report = IngestReport::default();
    for (index, line) in reader.lines().enumerate() {
        let line_no = index + 1;
        let line = line.with_context(|| format!("failed to read line {line_no}"))?;
        report.lines += 1;
        let Some(quad) = parse_quad(&line).with_context(|| format!("line {line_no}"))? else {
            continue;
        };
        db.count_quad(quad.subject, quad.property, quad.object, quad.chunk)
            .with_context(|| format!("line {line_no}: failed to count quad"))?;
        report.quads += 1;
    }
    db.flush().context("failed to flush statistics")?;
    report.chunk_sizes = db.chunk_sizes();
    tracing::info!(
        target: "graphstats.cli",
        lines = report.lines,
        quads = report.quads,
        "ingested quads"
    );
    Ok(report)
}
