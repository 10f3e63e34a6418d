use serialprims_frame::{DecodeEvent, FrameDecoder};
use tracing::{info, warn};

use crate::cmd::{read_input, DecodeArgs};
use crate::exit::{CliResult, DATA_INVALID, SUCCESS};
use crate::output::{print_frame, print_frame_error, OutputFormat};

pub fn run(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    let bytes = read_input(&args.input, true)?;
    let mut decoder = FrameDecoder::new(args.max_payload);

    for event in decoder.push(&bytes) {
        match event {
            DecodeEvent::Frame(frame) => print_frame(&frame, None, format),
            DecodeEvent::Error(err) => print_frame_error(&err, format),
        }
    }

    if decoder.in_frame() {
        warn!("input ends inside a frame");
    }
    let stats = decoder.stats();
    info!(
        frames = stats.frames,
        errors = stats.errors,
        skipped = stats.skipped,
        "decode finished"
    );

    Ok(if stats.errors == 0 { SUCCESS } else { DATA_INVALID })
}
