//! Event sinks. The JSON-lines format is the stable wire contract; the human
//! format is for eyeballs. Both are safe to call from concurrent fingerprint
//! workers.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::Result;
use colored::*;

use crate::cli::OutputFormat;
use crate::engine::ServiceEvent;

pub struct EventWriter {
    format: OutputFormat,
    sink: Mutex<Box<dyn Write + Send>>,
}

impl EventWriter {
    pub fn new(format: OutputFormat, file: Option<PathBuf>) -> Result<Self> {
        let sink: Box<dyn Write + Send> = match file {
            Some(path) => Box::new(BufWriter::new(File::create(path)?)),
            None => Box::new(io::stdout()),
        };
        Ok(Self { format, sink: Mutex::new(sink) })
    }

    pub fn write(&self, event: &ServiceEvent) {
        let line = match self.format {
            OutputFormat::Jsonl => match serde_json::to_string(event) {
                Ok(json) => json,
                Err(_) => return,
            },
            OutputFormat::Human => format_human(event),
        };

        if let Ok(mut sink) = self.sink.lock() {
            let _ = writeln!(sink, "{line}");
            let _ = sink.flush();
        }
    }
}

fn format_human(event: &ServiceEvent) -> String {
    let endpoint = format!("{}:{}", event.ip, event.port);
    let tls_marker = if event.tls { " (tls)".bright_black().to_string() } else { String::new() };
    format!(
        "{}  {}  {}{}",
        endpoint.bright_white().bold(),
        event.protocol.bright_green(),
        event.transport.bright_yellow(),
        tls_marker,
    )
}
