use clap::{Parser, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "portprobe")]
#[command(version = "0.1.0")]
#[command(about = "Internet service fingerprinting pipeline", long_about = None)]
pub struct Cli {
    #[arg(help = "Target IP, hostname, IP range (IP1-IP2), or CIDR (192.168.1.0/24). Can be specified multiple times.")]
    pub target: Vec<String>,

    #[arg(short, long, help = "Ports to probe: -p22,80,443 or -p1-1000 or -p- for all ports. Defaults to 1-1000.")]
    pub ports: Option<Vec<String>>,

    #[arg(long, help = "Per-probe deadline in milliseconds, applied to connect and read/write (default: 2000)")]
    pub timeout: Option<u64>,

    #[arg(long, help = "Fast mode: only try probes whose default port matches the target port")]
    pub fast: bool,

    #[arg(long, help = "Also send UDP probes to ports with a UDP service affinity")]
    pub udp: bool,

    #[arg(short, long, help = "Emit diagnostic lines on stderr")]
    pub verbose: bool,

    #[arg(long, help = "Concurrent fingerprint workers (default: 50)")]
    pub workers: Option<usize>,

    #[arg(long, help = "Concurrent discovery connections (default: 256)")]
    pub discovery_parallelism: Option<usize>,

    #[arg(short = 'o', long, value_enum, default_value = "human", help = "Output format")]
    pub output_format: OutputFormat,

    #[arg(short = 'f', long, help = "Output file path")]
    pub output_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq)]
pub enum OutputFormat {
    #[value(name = "human", help = "Human-readable lines")]
    Human,
    #[value(name = "jsonl", help = "One service event as JSON per line")]
    Jsonl,
}
