use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serialprims_frame::{DecodeEvent, FrameConfig, FrameError, FrameReader};
use serialprims_transport::{SerialDevice, SerialStream, TcpBridge};
use tracing::{debug, info};

use crate::cmd::{parse_duration, MonitorArgs};
use crate::exit::{frame_error, transport_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_frame, print_frame_error, OutputFormat};

// Read timeout on sockets so a Ctrl-C is noticed between reads.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

pub fn run(args: MonitorArgs, format: OutputFormat) -> CliResult<i32> {
    let stream = open(&args)?;
    let config = FrameConfig {
        max_payload_size: args.max_payload,
        read_timeout: (stream.kind() != "device").then_some(POLL_INTERVAL),
        ..FrameConfig::default()
    };
    let mut reader = FrameReader::with_config_serial(stream, config)
        .map_err(|err| frame_error("monitor setup failed", err))?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let mut printed = 0usize;
    while running.load(Ordering::SeqCst) {
        let event = match reader.read_event() {
            Ok(event) => event,
            Err(FrameError::Io(err))
                if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
            {
                continue
            }
            Err(FrameError::ConnectionClosed) => {
                debug!("link closed");
                break;
            }
            Err(err) => return Err(frame_error("read failed", err)),
        };

        match event {
            DecodeEvent::Frame(frame) => {
                print_frame(&frame, None, format);
                printed = printed.saturating_add(1);
                if args.count.is_some_and(|count| printed >= count) {
                    break;
                }
            }
            DecodeEvent::Error(err) if !args.quiet_errors => print_frame_error(&err, format),
            DecodeEvent::Error(_) => {}
        }
    }

    let stats = reader.stats();
    info!(
        frames = stats.frames,
        errors = stats.errors,
        skipped = stats.skipped,
        "monitor stopped"
    );
    Ok(SUCCESS)
}

fn open(args: &MonitorArgs) -> CliResult<SerialStream> {
    if args.tcp {
        let timeout = parse_duration(&args.connect_timeout)?;
        TcpBridge::connect(&args.target, Some(timeout))
            .map_err(|err| transport_error("connect failed", err))
    } else {
        SerialDevice::open(&args.target).map_err(|err| transport_error("open failed", err))
    }
}

// A device read only returns with the next byte, so a second Ctrl-C exits
// right away.
fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        if !running.swap(false, Ordering::SeqCst) {
            std::process::exit(130);
        }
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
