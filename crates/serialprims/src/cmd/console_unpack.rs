use serialprims_console::{decode_batch, split_transmissions, unpack};

use crate::cmd::{read_input, ConsoleUnpackArgs};
use crate::exit::{CliResult, DATA_INVALID, SUCCESS};
use crate::output::{print_console_error, print_payload, print_smp, OutputFormat};

pub fn run(args: ConsoleUnpackArgs, format: OutputFormat) -> CliResult<i32> {
    let bytes = read_input(&args.input, true)?;
    let mut failed = 0usize;

    if args.no_smp {
        for transmission in split_transmissions(&bytes) {
            match unpack(transmission) {
                Ok(payload) => print_payload(&payload, format),
                Err(err) => {
                    failed += 1;
                    print_console_error(&err, format);
                }
            }
        }
    } else {
        for result in decode_batch(&bytes) {
            match result {
                Ok(message) => print_smp(&message, format),
                Err(err) => {
                    failed += 1;
                    print_console_error(&err, format);
                }
            }
        }
    }

    Ok(if failed == 0 { SUCCESS } else { DATA_INVALID })
}
