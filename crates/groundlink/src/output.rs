use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use serde_json::Value;

use crate::cmd::TransportKind;
use crate::input::to_hex;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct PacketOutput<'a> {
    transport: &'a str,
    size: usize,
    payload: String,
    hex: String,
    timestamp: String,
}

pub fn print_packet(transport: TransportKind, payload: &[u8], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = PacketOutput {
                transport: transport.name(),
                size: payload.len(),
                payload: payload_preview(payload),
                hex: to_hex(payload),
                timestamp: now_unix_seconds(),
            };
            print_json(&out);
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["TRANSPORT", "SIZE", "PAYLOAD"])
                .add_row(vec![
                    transport.name().to_string(),
                    payload.len().to_string(),
                    payload_preview(payload),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "transport={} size={} payload={}",
                transport.name(),
                payload.len(),
                payload_preview(payload)
            );
        }
        OutputFormat::Raw => print_raw(payload),
    }
}

#[derive(Serialize)]
pub struct SendReport<'a> {
    pub transport: &'a str,
    pub bytes_sent: usize,
    /// What the simulated far end saw on the wire.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wire: Option<String>,
    pub stats: Value,
}

pub fn print_send_report(report: &SendReport<'_>, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(report),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["TRANSPORT", "BYTES", "WIRE"])
                .add_row(vec![
                    report.transport.to_string(),
                    report.bytes_sent.to_string(),
                    report.wire.clone().unwrap_or_else(|| "-".to_string()),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            print!("sent {} bytes over {}", report.bytes_sent, report.transport);
            if let Some(wire) = &report.wire {
                print!(" wire={wire}");
            }
            println!();
        }
    }
}

/// Two-column table used by the smaller reports.
pub fn print_pairs(header: [&str; 2], rows: &[(String, String)]) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header.to_vec());
    for (key, value) in rows {
        table.add_row(vec![key.clone(), value.clone()]);
    }
    println!("{table}");
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
