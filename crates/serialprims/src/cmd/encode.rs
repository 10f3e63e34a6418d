use serialprims_frame::Frame;
use tracing::debug;

use crate::cmd::{read_input, EncodeArgs};
use crate::exit::{frame_error, CliResult, SUCCESS};
use crate::output::{print_frame, OutputFormat};

pub fn run(args: EncodeArgs, format: OutputFormat) -> CliResult<i32> {
    let payload = read_input(&args.input, false)?;
    let frame = Frame::new(args.msg_type, args.flags, args.seq, payload);
    let wire = frame
        .to_bytes()
        .map_err(|err| frame_error("encode failed", err))?;

    debug!(len = wire.len(), crc = frame.checksum(), "frame encoded");
    print_frame(&frame, Some(&wire[..]), format);
    Ok(SUCCESS)
}
