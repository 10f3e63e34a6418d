use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use serialprims_console::{ConsoleError, SmpMessage};
use serialprims_frame::flags::flags_name;
use serialprims_frame::{Frame, FrameError, MessageType};

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
struct FrameOutput<'a> {
    event: &'a str,
    msg_type: u16,
    category: &'a str,
    message_id: u16,
    flags: u8,
    kind: &'a str,
    seq: u32,
    payload_size: usize,
    payload_hex: String,
    crc: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    wire_hex: Option<String>,
    timestamp: String,
}

#[derive(Serialize)]
struct ErrorOutput<'a> {
    event: &'a str,
    error: String,
    timestamp: String,
}

/// Print a decoded or freshly encoded frame. `wire` is shown when given.
pub fn print_frame(frame: &Frame, wire: Option<&[u8]>, format: OutputFormat) {
    let ty = MessageType::from(frame.msg_type);
    match format {
        OutputFormat::Json => {
            let out = FrameOutput {
                event: "frame",
                msg_type: frame.msg_type,
                category: ty.category().name(),
                message_id: ty.id(),
                flags: frame.flags,
                kind: flags_name(frame.flags),
                seq: frame.seq,
                payload_size: frame.payload.len(),
                payload_hex: hex::encode(&frame.payload),
                crc: frame.checksum(),
                wire_hex: wire.map(hex::encode),
                timestamp: now_unix_seconds(),
            };
            print_json(&out);
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["TYPE", "KIND", "SEQ", "SIZE", "PAYLOAD"])
                .add_row(vec![
                    ty.to_string(),
                    flags_name(frame.flags).to_string(),
                    frame.seq.to_string(),
                    frame.payload.len().to_string(),
                    payload_preview(&frame.payload),
                ]);
            println!("{table}");
            if let Some(wire) = wire {
                println!("wire: {}", spaced_hex(wire));
            }
        }
        OutputFormat::Pretty => {
            println!(
                "type={} kind={} seq={} size={} crc=0x{:04X} payload={}",
                ty,
                flags_name(frame.flags),
                frame.seq,
                frame.payload.len(),
                frame.checksum(),
                payload_preview(&frame.payload)
            );
            if let Some(wire) = wire {
                println!("wire={}", spaced_hex(wire));
            }
        }
        OutputFormat::Raw => match wire {
            Some(wire) => print_raw(wire),
            None => print_raw(&frame.payload),
        },
    }
}

pub fn print_frame_error(err: &FrameError, format: OutputFormat) {
    print_error("decode_error", &err.to_string(), format);
}

pub fn print_console_error(err: &ConsoleError, format: OutputFormat) {
    print_error("console_error", &err.to_string(), format);
}

fn print_error(event: &str, message: &str, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&ErrorOutput {
            event,
            error: message.to_string(),
            timestamp: now_unix_seconds(),
        }),
        OutputFormat::Table | OutputFormat::Pretty => println!("{event}: {message}"),
        // Raw output carries data only.
        OutputFormat::Raw => {}
    }
}

#[derive(Serialize)]
struct FragmentsOutput {
    payload_size: usize,
    fragments: Vec<String>,
}

pub fn print_fragments(payload_size: usize, fragments: &[Vec<u8>], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&FragmentsOutput {
            payload_size,
            fragments: fragments.iter().map(hex::encode).collect(),
        }),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["#", "MARKER", "SIZE", "TEXT"]);
            for (index, fragment) in fragments.iter().enumerate() {
                table.add_row(vec![
                    index.to_string(),
                    spaced_hex(&fragment[..2]),
                    fragment.len().to_string(),
                    fragment_text(fragment),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for (index, fragment) in fragments.iter().enumerate() {
                println!(
                    "fragment={} marker={} text={}",
                    index,
                    spaced_hex(&fragment[..2]),
                    fragment_text(fragment)
                );
            }
        }
        OutputFormat::Raw => print_raw(&fragments.concat()),
    }
}

#[derive(Serialize)]
struct SmpOutput<'a> {
    event: &'a str,
    op: u8,
    op_name: &'a str,
    flags: u8,
    len: u16,
    group: u16,
    seq: u8,
    id: u8,
    body_hex: String,
}

pub fn print_smp(message: &SmpMessage, format: OutputFormat) {
    let header = &message.header;
    let op_name = header.mgmt_op().map_or("UNKNOWN", |op| op.name());
    match format {
        OutputFormat::Json => print_json(&SmpOutput {
            event: "smp",
            op: header.op,
            op_name,
            flags: header.flags,
            len: header.len,
            group: header.group,
            seq: header.seq,
            id: header.id,
            body_hex: hex::encode(&message.body),
        }),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["OP", "GROUP", "ID", "SEQ", "LEN", "BODY"])
                .add_row(vec![
                    op_name.to_string(),
                    header.group.to_string(),
                    header.id.to_string(),
                    header.seq.to_string(),
                    header.len.to_string(),
                    hex::encode(&message.body),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => println!(
            "op={} group={} id={} seq={} len={} body={}",
            op_name,
            header.group,
            header.id,
            header.seq,
            header.len,
            hex::encode(&message.body)
        ),
        OutputFormat::Raw => print_raw(&message.to_bytes()),
    }
}

#[derive(Serialize)]
struct PayloadOutput<'a> {
    event: &'a str,
    payload_size: usize,
    payload_hex: String,
}

/// Print an unpacked console payload that was not interpreted further.
pub fn print_payload(payload: &[u8], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&PayloadOutput {
            event: "payload",
            payload_size: payload.len(),
            payload_hex: hex::encode(payload),
        }),
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("size={} payload={}", payload.len(), spaced_hex(payload))
        }
        OutputFormat::Raw => print_raw(payload),
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

pub fn spaced_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) if !text.chars().any(char::is_control) => text.to_string(),
        _ => spaced_hex(payload),
    }
}

// Base64 text between the marker and the terminator.
fn fragment_text(fragment: &[u8]) -> String {
    let end = fragment.len().saturating_sub(1).max(2);
    String::from_utf8_lossy(&fragment[2..end]).into_owned()
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
