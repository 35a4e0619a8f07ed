use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use colored::*;
use tokio::sync::mpsc;

use portprobe::cli::{Cli, OutputFormat};
use portprobe::discovery::{self, DiscoveryConfig};
use portprobe::engine::{ScanConfig, StreamDriver};
use portprobe::network::{parse_ports, parse_targets};
use portprobe::output::EventWriter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(if cli.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::WARN
        })
        .init();

    if cli.target.is_empty() {
        eprintln!("{}", "Error: no target specified.".red());
        eprintln!("Example: portprobe 192.168.1.1 -p 21,22,80");
        eprintln!("Run 'portprobe --help' for more information.");
        std::process::exit(1);
    }

    let targets = parse_targets(&cli.target.join(","))?;
    let ports_spec = match &cli.ports {
        Some(ports) if ports.len() == 1 && ports[0] == "-" => "-".to_string(),
        Some(ports) => ports.join(","),
        None => "1-1000".to_string(),
    };
    let ports = parse_ports(&ports_spec)?;

    let scan_config = ScanConfig {
        default_timeout: Duration::from_millis(cli.timeout.unwrap_or(2000)),
        fast_mode: cli.fast,
        include_udp: cli.udp,
        verbose: cli.verbose,
    };
    let driver = StreamDriver::new(scan_config, cli.workers.unwrap_or(50))?;

    let cancel = driver.cancel_flag();
    let ctrl_c_cancel = Arc::clone(&cancel);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_cancel.store(true, Ordering::Relaxed);
        }
    });

    let writer = Arc::new(EventWriter::new(cli.output_format, cli.output_file)?);
    let discovery_config = DiscoveryConfig {
        connect_timeout: Duration::from_millis(cli.timeout.unwrap_or(2000)),
        parallelism: cli.discovery_parallelism.unwrap_or(256),
        include_udp: cli.udp,
        show_progress: cli.output_format == OutputFormat::Human,
    };

    let (tx, rx) = mpsc::channel(1024);
    let on_event = {
        let writer = Arc::clone(&writer);
        move |event| writer.write(&event)
    };

    let (drive, discover) = tokio::join!(
        driver.run(rx, on_event),
        discovery::run(&targets, &ports, &discovery_config, driver.registry(), &cancel, tx),
    );
    discover?;
    drive?;

    Ok(())
}
