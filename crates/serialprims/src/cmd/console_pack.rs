use serialprims_console::{pack, SmpMessage};

use crate::cmd::{read_input, ConsolePackArgs};
use crate::exit::{console_error, CliResult, SUCCESS};
use crate::output::{print_fragments, OutputFormat};

pub fn run(args: ConsolePackArgs, format: OutputFormat) -> CliResult<i32> {
    let input = read_input(&args.input, false)?;
    let payload = match args.op {
        Some(op) => SmpMessage::new(op.into(), args.group, args.id, args.smp_seq, input)
            .map_err(|err| console_error("invalid management message", err))?
            .to_bytes(),
        None => input,
    };

    let fragments =
        pack(&payload, args.max_packet_size).map_err(|err| console_error("pack failed", err))?;
    print_fragments(payload.len(), &fragments, format);
    Ok(SUCCESS)
}
