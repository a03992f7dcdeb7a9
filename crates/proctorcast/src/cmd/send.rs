use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use proctorcast_frame::{FrameKind, FrameWriter, MESSAGE, NAME};
use proctorcast_peer::format_identity;
use proctorcast_transport::{connect_tcp, discover_server, DiscoveryConfig, SocketConfig};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cmd::{build_runtime, parse_duration, SendArgs};
use crate::exit::{frame_error, io_error, peer_error, transport_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_record, OutputFormat};

#[derive(Serialize)]
struct SendOutput {
    server: String,
    frames: usize,
    bytes: usize,
    kind: Option<&'static str>,
}

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let discovery_timeout = parse_duration(&args.identity.discovery_timeout)?;
    let identity = format_identity(&args.identity.id, &args.identity.name)
        .map_err(|err| peer_error("send failed", err))?;
    let extra = resolve_payload(&args)?;

    build_runtime()?.block_on(send(
        args.identity.port,
        args.identity.server,
        discovery_timeout,
        identity,
        extra,
        format,
    ))
}

fn resolve_payload(args: &SendArgs) -> CliResult<Option<(u16, Vec<u8>)>> {
    if let Some(text) = &args.message {
        if text.is_empty() {
            return Err(CliError::new(USAGE, "--message must not be empty"));
        }
        return Ok(Some((MESSAGE, text.as_bytes().to_vec())));
    }
    if let Some(path) = &args.file {
        if args.tag == NAME {
            return Err(CliError::new(USAGE, "--tag 0 is reserved for identity frames"));
        }
        let data = fs::read(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err))?;
        return Ok(Some((args.tag, data)));
    }
    Ok(None)
}

async fn send(
    port: u16,
    server: Option<IpAddr>,
    discovery_timeout: Duration,
    identity: String,
    extra: Option<(u16, Vec<u8>)>,
    format: OutputFormat,
) -> CliResult<i32> {
    let ip = match server {
        Some(ip) => ip,
        None => {
            let mut discovery = DiscoveryConfig::new(port);
            discovery.listen_timeout = discovery_timeout;
            discover_server(&discovery, &CancellationToken::new())
                .await
                .map_err(|err| transport_error("discovery failed", err))?
        }
    };

    let addr = SocketAddr::new(ip, port);
    let stream = connect_tcp(addr, &SocketConfig::default())
        .await
        .map_err(|err| transport_error("connect failed", err))?;
    let mut writer = FrameWriter::new(stream);

    writer
        .send(NAME, identity.as_bytes())
        .await
        .map_err(|err| frame_error("send failed", err))?;
    let mut out = SendOutput {
        server: addr.to_string(),
        frames: 1,
        bytes: identity.len(),
        kind: None,
    };

    if let Some((tag, payload)) = &extra {
        writer
            .send(*tag, payload)
            .await
            .map_err(|err| frame_error("send failed", err))?;
        out.frames += 1;
        out.bytes += payload.len();
        out.kind = Some(FrameKind::from_tag(*tag).name());
    }

    if let Err(err) = writer.get_mut().shutdown().await {
        debug!(error = %err, "shutdown after send failed");
    }

    let fields = [
        ("server", out.server.clone()),
        ("frames", out.frames.to_string()),
        ("bytes", out.bytes.to_string()),
        ("kind", out.kind.unwrap_or("-").to_string()),
    ];
    print_record(&out, &fields, format);
    Ok(SUCCESS)
}
