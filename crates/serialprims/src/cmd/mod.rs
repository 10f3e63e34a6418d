use clap::{Args, Subcommand, ValueEnum};
use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

use serialprims_console::config::DEFAULT_MAX_PACKET_SIZE;
use serialprims_console::MgmtOp;
use serialprims_frame::DEFAULT_MAX_PAYLOAD;

use crate::exit::{io_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod console_pack;
pub mod console_unpack;
pub mod decode;
pub mod encode;
pub mod monitor;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Encode one binary frame and print its wire bytes.
    Encode(EncodeArgs),
    /// Decode binary frames from hex or a capture file.
    Decode(DecodeArgs),
    /// Wrap a payload in console fragments.
    ConsolePack(ConsolePackArgs),
    /// Reassemble console transmissions and decode their management headers.
    ConsoleUnpack(ConsoleUnpackArgs),
    /// Print frames arriving on a device node or TCP serial bridge.
    Monitor(MonitorArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Encode(args) => encode::run(args, format),
        Command::Decode(args) => decode::run(args, format),
        Command::ConsolePack(args) => console_pack::run(args, format),
        Command::ConsoleUnpack(args) => console_unpack::run(args, format),
        Command::Monitor(args) => monitor::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// Where input bytes come from. Without any of these, stdin is read.
#[derive(Args, Debug, Default)]
pub struct InputArgs {
    /// Bytes as hex; whitespace, commas and `0x` prefixes are ignored.
    #[arg(long, conflicts_with_all = ["data", "file"])]
    pub hex: Option<String>,
    /// Bytes as a UTF-8 string.
    #[arg(long, conflicts_with_all = ["hex", "file"])]
    pub data: Option<String>,
    /// Read bytes from a file.
    #[arg(long, conflicts_with_all = ["hex", "data"])]
    pub file: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct EncodeArgs {
    /// Message TYPE (decimal or 0x-prefixed).
    #[arg(long = "type", value_name = "TYPE", value_parser = parse_number::<u16>)]
    pub msg_type: u16,
    /// Flags byte.
    #[arg(long, default_value = "0", value_parser = parse_number::<u8>)]
    pub flags: u8,
    /// Sequence number.
    #[arg(long, default_value = "0", value_parser = parse_number::<u32>)]
    pub seq: u32,
    #[command(flatten)]
    pub input: InputArgs,
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    #[command(flatten)]
    pub input: InputArgs,
    /// Largest payload accepted before a frame is rejected.
    #[arg(long, default_value_t = DEFAULT_MAX_PAYLOAD)]
    pub max_payload: usize,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum SmpOp {
    Read,
    ReadRsp,
    Write,
    WriteRsp,
}

impl From<SmpOp> for MgmtOp {
    fn from(op: SmpOp) -> Self {
        match op {
            SmpOp::Read => MgmtOp::ReadRequest,
            SmpOp::ReadRsp => MgmtOp::ReadResponse,
            SmpOp::Write => MgmtOp::WriteRequest,
            SmpOp::WriteRsp => MgmtOp::WriteResponse,
        }
    }
}

#[derive(Args, Debug)]
pub struct ConsolePackArgs {
    #[command(flatten)]
    pub input: InputArgs,
    /// Largest fragment on the wire, marker and terminator included.
    #[arg(long, default_value_t = DEFAULT_MAX_PACKET_SIZE)]
    pub max_packet_size: usize,
    /// Prefix the input with a management header using this op.
    #[arg(long, value_enum)]
    pub op: Option<SmpOp>,
    /// Management group (with --op).
    #[arg(long, default_value_t = 0, requires = "op")]
    pub group: u16,
    /// Command id within the group (with --op).
    #[arg(long, default_value_t = 0, requires = "op")]
    pub id: u8,
    /// Management sequence number (with --op).
    #[arg(long = "smp-seq", default_value_t = 0, requires = "op")]
    pub smp_seq: u8,
}

#[derive(Args, Debug)]
pub struct ConsoleUnpackArgs {
    #[command(flatten)]
    pub input: InputArgs,
    /// Print reassembled payloads without reading a management header.
    #[arg(long)]
    pub no_smp: bool,
}

#[derive(Args, Debug)]
pub struct MonitorArgs {
    /// Device node path, or HOST:PORT with --tcp.
    pub target: String,
    /// Connect to a TCP serial bridge instead of opening a device node.
    #[arg(long)]
    pub tcp: bool,
    /// Exit after printing N frames.
    #[arg(long)]
    pub count: Option<usize>,
    /// Largest payload accepted before a frame is rejected.
    #[arg(long, default_value_t = DEFAULT_MAX_PAYLOAD)]
    pub max_payload: usize,
    /// Connection timeout for --tcp (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub connect_timeout: String,
    /// Do not print decode errors.
    #[arg(long)]
    pub quiet_errors: bool,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Resolve input bytes; falls back to stdin when `stdin_fallback` is set,
/// otherwise to an empty buffer.
pub fn read_input(args: &InputArgs, stdin_fallback: bool) -> CliResult<Vec<u8>> {
    if let Some(hex) = &args.hex {
        return parse_hex(hex);
    }
    if let Some(data) = &args.data {
        return Ok(data.as_bytes().to_vec());
    }
    if let Some(path) = &args.file {
        return std::fs::read(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err));
    }
    if !stdin_fallback {
        return Ok(Vec::new());
    }
    let mut buf = Vec::new();
    std::io::stdin()
        .read_to_end(&mut buf)
        .map_err(|err| io_error("failed reading stdin", err))?;
    Ok(buf)
}

pub fn parse_hex(input: &str) -> CliResult<Vec<u8>> {
    let digits: String = input
        .split(|c: char| c.is_whitespace() || c == ',')
        .map(|token| {
            token
                .strip_prefix("0x")
                .or_else(|| token.strip_prefix("0X"))
                .unwrap_or(token)
        })
        .collect();
    hex::decode(&digits).map_err(|err| CliError::new(USAGE, format!("invalid hex input: {err}")))
}

pub fn parse_number<T: TryFrom<u64>>(input: &str) -> Result<T, String> {
    let input = input.trim();
    let value = match input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
    {
        Some(digits) => u64::from_str_radix(digits, 16),
        None => input.parse::<u64>(),
    }
    .map_err(|err| format!("invalid number {input:?}: {err}"))?;
    T::try_from(value).map_err(|_| format!("{value} is out of range"))
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    let (number, millis) = match input.strip_suffix("ms") {
        Some(number) => (number, true),
        None => (input.strip_suffix('s').unwrap_or(input), false),
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration: {input:?}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}
