use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cmdserver_client::{ExchangeOptions, PersistentClient};
use tracing::{info, warn};

use crate::cmd::BatchArgs;
use crate::exit::{client_error, io_error, CliError, CliResult, FAILURE, INTERNAL, SUCCESS};
use crate::output::{print_exchange, ExchangeOutput, OutputFormat};

pub fn run(args: BatchArgs, format: OutputFormat) -> CliResult<i32> {
    let client = args.server.connect(&args.repository)?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let stdin = std::io::stdin();
    let code = run_lines(&client, stdin.lock(), &running, args.fail_fast, format)?;
    client.stop();
    Ok(code)
}

/// Run every non-blank line of `input` as one whitespace-split command.
///
/// Failed commands are reported and the batch continues on a fresh server,
/// unless `fail_fast` is set.
fn run_lines(
    client: &PersistentClient,
    input: impl BufRead,
    running: &AtomicBool,
    fail_fast: bool,
    format: OutputFormat,
) -> CliResult<i32> {
    let mut failed = 0usize;
    let mut total = 0usize;

    for line in input.lines() {
        if !running.load(Ordering::SeqCst) {
            info!(total, "interrupted, stopping batch");
            break;
        }
        let line = line.map_err(|err| io_error("failed to read stdin", err))?;
        let argv: Vec<String> = line.split_whitespace().map(str::to_string).collect();
        if argv.is_empty() {
            continue;
        }
        total += 1;

        match client.run(&argv, ExchangeOptions::new()) {
            Ok(result) => {
                if !result.is_success() {
                    failed += 1;
                }
                let out = ExchangeOutput::new(&argv, &result, false);
                print_exchange(&out, &result, format);
            }
            Err(err) => {
                failed += 1;
                let err = client_error(&argv.join(" "), err);
                if fail_fast {
                    return Err(err);
                }
                warn!(code = err.code, "{err}");
            }
        }

        if fail_fast && failed > 0 {
            break;
        }
    }

    info!(total, failed, "batch finished");
    Ok(if failed == 0 { SUCCESS } else { FAILURE })
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
