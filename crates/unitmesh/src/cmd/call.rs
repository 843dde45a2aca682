use unitmesh_link::RpcClient;

use crate::cmd::{parse_duration, CallArgs};
use crate::exit::{link_error, CliError, CliResult, SUCCESS, USAGE};

pub fn run(args: CallArgs) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)
        .ok_or_else(|| CliError::new(USAGE, format!("invalid timeout: {}", args.timeout)))?;

    let reply = RpcClient::new(args.unit.as_str())
        .with_timeout(timeout)
        .call(&args.action, args.data.as_bytes())
        .map_err(|err| link_error("call failed", err))?;

    println!("{}", String::from_utf8_lossy(reply.as_ref()));
    Ok(SUCCESS)
}
