//! Human-readable cluster report

use crate::stats::aggregator::ClusterReport;
use std::fmt::Write;

const BANNER: &str = "========================================";

fn rule() -> String {
    "-".repeat(60)
}

/// Render the cluster report
///
/// Sections, in order:
/// - Header with the generation time
/// - Cluster configuration
/// - Per-node results in collection order
/// - Merged abundance path (only after a successful merge)
/// - Summary
pub fn render_report(report: &ClusterReport) -> String {
    let mut out = String::new();

    // fmt::Write into a String cannot fail
    let _ = write_report(&mut out, report);
    out
}

fn write_report(out: &mut String, report: &ClusterReport) -> std::fmt::Result {
    writeln!(out, "{}", BANNER)?;
    writeln!(out, "  Arda Cluster Classification Report")?;
    writeln!(out, "  Generated: {}", report.generated_at)?;
    writeln!(out, "{}", BANNER)?;
    writeln!(out)?;

    writeln!(out, "CLUSTER CONFIGURATION")?;
    writeln!(out, "  Master: {}", report.coordinator)?;
    writeln!(out, "  Workers: {}", report.workers.join(", "))?;
    writeln!(out, "  Database: {}", report.database.display())?;
    writeln!(out, "  K-mer size: {}", report.kmer_size)?;
    writeln!(out, "  Batch size: {}", report.batch_size)?;
    writeln!(out, "  Processes: {}", report.world_size)?;
    writeln!(out)?;

    writeln!(out, "NODE RESULTS")?;
    writeln!(out, "{}", rule())?;
    for node in &report.nodes {
        writeln!(out, "  {}:", node.hostname)?;
        writeln!(out, "    Status: {}", node.status_label())?;
        if node.succeeded {
            writeln!(out, "    Elapsed: {:.1} seconds", node.elapsed_seconds)?;
            if let Some(ref path) = node.result_file {
                writeln!(out, "    Result: {}", path.display())?;
            }
            if let Some(ref path) = node.abundance_file {
                writeln!(out, "    Abundance: {}", path.display())?;
            }
        } else {
            writeln!(
                out,
                "    Error: {}",
                node.error_message.as_deref().unwrap_or("unknown error")
            )?;
        }
        writeln!(out)?;
    }

    if let Some(path) = report.merge.merged_path() {
        writeln!(out, "MERGED ABUNDANCE")?;
        writeln!(out, "{}", rule())?;
        writeln!(out, "  {}", path.display())?;
        writeln!(out)?;
    }

    let s = &report.summary;
    writeln!(out, "SUMMARY")?;
    writeln!(out, "{}", rule())?;
    writeln!(out, "  Nodes processed: {}/{}", s.successful_nodes, s.total_nodes)?;
    writeln!(out, "  Total CPU time: {:.1} seconds", s.total_cpu_seconds)?;
    writeln!(
        out,
        "  Wall clock time: {:.1} seconds (parallel)",
        s.wall_clock_seconds
    )?;
    writeln!(out, "  Speedup: {:.2}x", s.speedup)?;
    writeln!(out)?;

    Ok(())
}
