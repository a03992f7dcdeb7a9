use serde::Serialize;
use tokio_util::sync::CancellationToken;

use proctorcast_transport::{discover_server, DiscoveryConfig};

use crate::cmd::{build_runtime, parse_duration, DiscoverArgs};
use crate::exit::{transport_error, CliResult, SUCCESS};
use crate::output::{print_record, OutputFormat};

#[derive(Serialize)]
struct DiscoveredOutput {
    server: String,
    port: u16,
}

pub fn run(args: DiscoverArgs, format: OutputFormat) -> CliResult<i32> {
    let mut config = DiscoveryConfig::new(args.port);
    config.listen_ip = args.listen;
    config.listen_timeout = parse_duration(&args.timeout)?;

    let cancel = CancellationToken::new();
    let server = build_runtime()?
        .block_on(discover_server(&config, &cancel))
        .map_err(|err| transport_error("discovery failed", err))?;

    let out = DiscoveredOutput {
        server: server.to_string(),
        port: args.port,
    };
    let fields = [
        ("server", out.server.clone()),
        ("port", out.port.to_string()),
    ];
    print_record(&out, &fields, format);
    Ok(SUCCESS)
}
