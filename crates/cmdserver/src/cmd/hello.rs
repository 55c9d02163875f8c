use crate::cmd::HelloArgs;
use crate::exit::{CliError, CliResult, SERVER_PROTOCOL, SUCCESS};
use crate::output::{print_hello, OutputFormat};

pub fn run(args: HelloArgs, format: OutputFormat) -> CliResult<i32> {
    let client = args.server.connect(&args.repository)?;
    let hello = client
        .hello()
        .ok_or_else(|| CliError::new(SERVER_PROTOCOL, "command server is not running"))?;
    print_hello(&hello, format);
    client.stop();
    Ok(SUCCESS)
}
