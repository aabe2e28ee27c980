//! arda-cluster CLI entry point

use anyhow::{Context, Result};
use arda_cluster::config::cli::{Cli, ExecutionMode};
use arda_cluster::config::ClusterConfig;
use arda_cluster::distributed::{CoordinatorChannel, DistributedCoordinator, NodeService, RankTable};
use arda_cluster::launcher::{spawn, Preflight, ReadyCluster, SshProbe};
use arda_cluster::runner::ProcessRunner;
use arda_cluster::util::logging;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

fn main() -> Result<()> {
    let cli = Cli::parse_args();
    cli.validate()?;

    match cli.effective_mode() {
        ExecutionMode::Launch => run_launch(cli),
        ExecutionMode::Preflight => run_preflight(cli),
        ExecutionMode::Participant => run_participant(cli),
    }
}

/// Config path from the CLI (presence checked by `Cli::validate`)
fn config_path(cli: &Cli) -> Result<&Path> {
    cli.config
        .as_deref()
        .context("config file required (-c <file>)")
}

/// Preflight, start participants, coordinate the run
fn run_launch(cli: Cli) -> Result<()> {
    println!("=== Arda Cluster Coordinator ===");
    println!("Loading configuration from: {}", config_path(&cli)?.display());

    let probe = SshProbe::default();
    let mut preflight = Preflight::new(&probe);
    let mut config = preflight.load(config_path(&cli)?)?;
    if let Some(port) = cli.port {
        config.options.port = port;
    }

    logging::init_coordinator(&config.logging, &config.log_path(), cli.verbose)?;

    let ready = preflight.check(config)?;
    print_topology(&ready);

    let runtime = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;
    runtime.block_on(coordinate(ready, cli.verbose))
}

async fn coordinate(ready: ReadyCluster, verbose: bool) -> Result<()> {
    let ReadyCluster { config, hosts, .. } = ready;
    let table = RankTable::new(hosts)?;
    let port = config.options.port;

    // Listen before any participant exists so none of them races the bind
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("Failed to bind coordination port {}", port))?;
    log::info!("Coordination channel listening on port {}", port);

    let coordinator_addr = format!("{}:{}", config.coordinator_host, port);
    let participants = spawn::spawn_participants(&config, &table, &coordinator_addr, verbose)?;

    let timeout = Duration::from_secs(config.options.startup_timeout_secs);
    let channel = match CoordinatorChannel::accept(&listener, table, timeout).await {
        Ok(channel) => channel,
        Err(e) => {
            spawn::terminate(participants);
            return Err(e.context("Participant startup failed"));
        }
    };

    let config = Arc::new(config);
    let report = match DistributedCoordinator::new(config, Arc::new(ProcessRunner))
        .run(channel)
        .await
    {
        Ok(report) => report,
        Err(e) => {
            spawn::terminate(participants);
            return Err(e);
        }
    };

    tokio::task::spawn_blocking(move || spawn::wait_participants(participants))
        .await
        .context("Failed to wait for participant processes")?;

    let s = &report.summary;
    println!();
    println!("Nodes processed: {}/{}", s.successful_nodes, s.total_nodes);
    println!("Report: {}", report.report_path.display());
    Ok(())
}

fn print_topology(ready: &ReadyCluster) {
    let config = &ready.config;
    println!(
        "Nodes to use: {} (master={}, workers={})",
        ready.hosts.len(),
        config.coordinator_host,
        ready.hosts[1..].join(",")
    );
    println!("Host file: {}", ready.host_file.display());
    println!("========================================");
    println!();
}

/// Validate configuration and cluster reachability, then exit
fn run_preflight(cli: Cli) -> Result<()> {
    logging::init_console(cli.verbose)?;

    println!("=== Pre-flight Checks ===");

    let probe = SshProbe::default();
    let mut preflight = Preflight::new(&probe);
    let config = preflight.load(config_path(&cli)?)?;
    println!("Configuration loaded successfully.");
    print_configuration(&config);

    match preflight.check(config) {
        Ok(ready) => {
            println!("Generated host file: {}", ready.host_file.display());
            for check in &ready.connectivity {
                println!("  {}: OK (hostname={})", check.host, check.detail);
            }
            println!();
            println!("Pre-flight checks passed ({} node(s)).", ready.hosts.len());
            Ok(())
        }
        Err(e) => {
            println!();
            println!("Pre-flight checks failed!");
            println!("Make sure:");
            println!("  1. Passwordless SSH is set up from the master to all nodes");
            println!("  2. The classifier and arda-cluster binaries exist at the same path on all nodes");
            Err(e.into())
        }
    }
}

fn print_configuration(config: &ClusterConfig) {
    println!("Master: {}", config.coordinator_host);
    println!("Workers: {}", config.participant_hosts.join(" "));
    println!("Database: {}", config.database_path.display());
    println!("Batch size: {}", config.classification.batch_size);
    println!("K-mer size: {}", config.classification.kmer_size);
    println!();

    println!("Reads configuration:");
    for (host, files) in &config.per_node_inputs {
        let mode = if files.len() == 2 { "paired-end" } else { "single-end" };
        println!("  {}: {} file(s) ({})", host, files.len(), mode);
        for f in files {
            println!("    - {}", f.display());
        }
    }
    println!();

    let c = &config.classification;
    println!("Classification options:");
    if let Some(v) = c.min_freq_target {
        println!("  min_freq_target: {}", v);
    }
    if let Some(v) = c.num_threads {
        println!("  num_threads: {}", v);
    }
    if let Some(v) = c.num_devices {
        println!("  num_devices: {}", v);
    }
    if let Some(v) = c.gap_iteration {
        println!("  gap_iteration: {}", v);
    }
    if let Some(ref v) = c.sampling_factor {
        println!("  sampling_factor: {}", v);
    }
    for (enabled, name) in [
        (c.tsk, "tsk"),
        (c.extended, "extended"),
        (c.gzipped, "gzipped"),
        (c.verbose, "verbose"),
    ] {
        if enabled {
            println!("  {}: true", name);
        }
    }
    println!();
}

/// Serve one run as a participant node
fn run_participant(cli: Cli) -> Result<()> {
    let rank = cli.rank.context("participant mode requires --rank")?;
    let coordinator = cli
        .coordinator
        .clone()
        .context("participant mode requires --coordinator")?;
    let host = match cli.host.clone() {
        Some(host) => host,
        None => hostname::get()
            .context("Failed to read system hostname")?
            .to_string_lossy()
            .into_owned(),
    };

    logging::init_participant(rank, &host, cli.verbose)?;

    let runtime = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;
    let result = runtime.block_on(async {
        NodeService::new(rank, host, Arc::new(ProcessRunner))
            .run(&coordinator)
            .await
    })?;

    // A failed classification is reported to the coordinator, not through
    // this process's exit status
    log::info!("Done: {}", result.status_label());
    Ok(())
}
