//! JSON cluster report
//!
//! Same content as the text report, for tooling that post-processes runs.

use crate::stats::aggregator::ClusterReport;
use crate::Result;
use anyhow::Context;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// Write `report` as pretty-printed JSON
pub fn write_report(report: &ClusterReport, output_path: &Path) -> Result<()> {
    let file = File::create(output_path)
        .with_context(|| format!("Failed to create {}", output_path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), report)
        .context("Failed to serialize cluster report")?;
    Ok(())
}
