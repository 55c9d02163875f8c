use std::io::{BufRead, ErrorKind, Read};

use cmdserver_client::{ExchangeOptions, PersistentClient};
use tracing::{debug, warn};

use crate::cmd::RunArgs;
use crate::exit::{client_error, CliResult};
use crate::output::{print_exchange, ExchangeOutput, OutputFormat};

pub fn run(args: RunArgs, format: OutputFormat) -> CliResult<i32> {
    let client = args.server.connect(&args.repository)?;
    let code = run_one(&client, &args, format)?;
    client.stop();
    Ok(code)
}

fn run_one(client: &PersistentClient, args: &RunArgs, format: OutputFormat) -> CliResult<i32> {
    let argv = &args.args;
    let mut options = ExchangeOptions::new().capture_debug(args.debug_channel);
    if args.stdin {
        options = options.on_line(read_line).on_input(read_block);
    }

    let result = client
        .run(argv, options)
        .map_err(|err| client_error("command failed", err))?;
    debug!(code = result.code, output = result.output.len(), "command finished");

    let out = ExchangeOutput::new(argv, &result, args.debug_channel);
    print_exchange(&out, &result, format);
    Ok(result.code)
}

const MAX_INPUT_BLOCK: usize = 64 * 1024;

/// One line from stdin, at most `size` bytes.
fn read_line(size: u32) -> Option<Vec<u8>> {
    Some(answer_line(&mut std::io::stdin().lock(), size))
}

/// Whatever stdin has ready, at most `size` bytes.
fn read_block(size: u32) -> Option<Vec<u8>> {
    Some(answer_block(&mut std::io::stdin().lock(), size))
}

/// The reply to a line prompt. End of input, or a failed read, is sent as
/// an empty block so the server sees EOF instead of waiting forever.
fn answer_line(input: &mut impl BufRead, size: u32) -> Vec<u8> {
    let mut line = Vec::new();
    if let Err(err) = input.take(u64::from(size)).read_until(b'\n', &mut line) {
        warn!(error = %err, "failed to read stdin, sending end of input");
        line.clear();
    }
    line
}

/// The reply to an input prompt. Empty at end of input or on a failed read.
fn answer_block(input: &mut impl Read, size: u32) -> Vec<u8> {
    let mut block = vec![0; (size as usize).min(MAX_INPUT_BLOCK)];
    loop {
        match input.read(&mut block) {
            Ok(n) => {
                block.truncate(n);
                return block;
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => {
                warn!(error = %err, "failed to read stdin, sending end of input");
                return Vec::new();
            }
        }
    }
}
