use cmdserver_client::{ServerConfig, MIN_PERSISTENT_VERSION};

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("cmdserver {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    let defaults = ServerConfig::default();
    println!("name: cmdserver");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "target: {}",
        option_env!("CMDSERVER_BUILD_TARGET").unwrap_or("unknown")
    );
    println!(
        "profile: {}",
        option_env!("CMDSERVER_BUILD_PROFILE").unwrap_or("unknown")
    );
    println!("git_hash: {}", option_env!("GIT_HASH").unwrap_or("unknown"));
    println!("default_program: {}", defaults.program.display());
    println!("default_server_args: {}", defaults.server_args.join(" "));
    println!("min_tool_version: {MIN_PERSISTENT_VERSION}");

    Ok(SUCCESS)
}
