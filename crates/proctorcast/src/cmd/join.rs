use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use proctorcast_peer::{Client, ClientConfig, ClientHandle, ClientState, PeerError, ScreenCapture};
use tracing::warn;

use crate::cmd::{build_runtime, parse_duration, wait_for_stop, JoinArgs};
use crate::exit::{peer_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_client_event, print_client_status, OutputFormat};

pub fn run(args: JoinArgs, format: OutputFormat) -> CliResult<i32> {
    let interval = parse_duration(&args.interval)?;
    let discovery_timeout = parse_duration(&args.identity.discovery_timeout)?;
    let limit = args.duration.as_deref().map(parse_duration).transpose()?;
    let capture = FileCapture::new(args.images)?;

    let identity = args.identity;
    let mut config = ClientConfig::new(identity.id, identity.name, identity.port)
        .with_frame_interval(interval);
    config.server = identity.server;
    config.discovery.listen_timeout = discovery_timeout;

    build_runtime()?.block_on(join(config, capture, args.message, limit, format))
}

async fn join(
    config: ClientConfig,
    capture: FileCapture,
    message: Option<String>,
    limit: Option<Duration>,
    format: OutputFormat,
) -> CliResult<i32> {
    let client = Client::new(config, capture)
        .on_event(move |event| print_client_event(event, format))
        .start()
        .map_err(|err| peer_error("join failed", err))?;

    tokio::select! {
        _ = wait_for_stop(limit) => {}
        _ = deliver_message(&client, message) => {}
    }

    let status = client.status();
    client.shutdown().await;
    print_client_status(&status, format);
    Ok(SUCCESS)
}

/// Send `message` once the first stream is up, then idle.
async fn deliver_message(client: &ClientHandle, message: Option<String>) {
    if let Some(text) = message {
        let mut status = client.subscribe();
        if status.wait_for(|s| s.state == ClientState::Streaming).await.is_ok() {
            if let Err(err) = client.send_message(text) {
                warn!(error = %err, "message not sent");
            }
        }
    }
    std::future::pending::<()>().await;
}

/// Capture source that replays image files in order, wrapping around.
struct FileCapture {
    paths: Vec<PathBuf>,
    next: usize,
}

impl FileCapture {
    fn new(paths: Vec<PathBuf>) -> CliResult<Self> {
        if paths.is_empty() {
            return Err(CliError::new(USAGE, "at least one image file is required"));
        }
        if let Some(missing) = paths.iter().find(|path| !path.is_file()) {
            return Err(CliError::new(
                USAGE,
                format!("image file not found: {}", missing.display()),
            ));
        }
        Ok(Self { paths, next: 0 })
    }
}

impl ScreenCapture for FileCapture {
    fn capture(&mut self) -> proctorcast_peer::Result<Bytes> {
        let Some(path) = self.paths.get(self.next) else {
            return Err(PeerError::Capture("no image files".to_string()));
        };
        self.next = (self.next + 1) % self.paths.len();
        fs::read(path)
            .map(Bytes::from)
            .map_err(|err| PeerError::Capture(format!("{}: {err}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_file(tag: &str, contents: &[u8]) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "proctorcast-join-{tag}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        fs::write(&path, contents).expect("temp file should be writable");
        path
    }

    #[test]
    fn file_capture_cycles_through_images() {
        let first = temp_file("a", b"first");
        let second = temp_file("b", b"second");
        let mut capture = FileCapture::new(vec![first.clone(), second.clone()]).unwrap();

        assert_eq!(capture.capture().unwrap(), "first");
        assert_eq!(capture.capture().unwrap(), "second");
        assert_eq!(capture.capture().unwrap(), "first");

        let _ = fs::remove_file(first);
        let _ = fs::remove_file(second);
    }

    #[test]
    fn missing_image_is_usage_error() {
        let err = FileCapture::new(vec![PathBuf::from("/nonexistent/proctorcast.png")])
            .err()
            .expect("missing file should be rejected");
        assert_eq!(err.code, USAGE);
    }

    #[test]
    fn deleted_image_is_capture_error() {
        let path = temp_file("gone", b"x");
        let mut capture = FileCapture::new(vec![path.clone()]).unwrap();
        fs::remove_file(&path).unwrap();
        assert!(matches!(capture.capture(), Err(PeerError::Capture(_))));
    }
}
