use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand, ValueEnum};
use proctorcast_roster::SortField;

use crate::exit::{CliError, CliResult, INTERNAL, USAGE};
use crate::output::OutputFormat;

pub mod discover;
pub mod join;
pub mod send;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run an observer: accept agents and print the live roster.
    Serve(ServeArgs),
    /// Run an agent that streams image files as its screen.
    Join(JoinArgs),
    /// Wait for one observer beacon and print its address.
    Discover(DiscoverArgs),
    /// Identify to an observer and send a single frame.
    Send(SendArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, format),
        Command::Join(args) => join::run(args, format),
        Command::Discover(args) => discover::run(args, format),
        Command::Send(args) => send::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum SortArg {
    Name,
    Id,
}

impl From<SortArg> for SortField {
    fn from(arg: SortArg) -> Self {
        match arg {
            SortArg::Name => SortField::Name,
            SortArg::Id => SortField::Id,
        }
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Session port for the TCP stream and the discovery beacon.
    #[arg(long, env = "PROCTORCAST_PORT")]
    pub port: u16,
    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0")]
    pub bind: IpAddr,
    /// Delay before a disconnected agent is removed (e.g. 5s, 500ms, 0).
    #[arg(long, default_value = "5s")]
    pub grace: String,
    /// How often to print the roster.
    #[arg(long, default_value = "2s")]
    pub interval: String,
    /// Stop after this long instead of waiting for Ctrl-C.
    #[arg(long)]
    pub duration: Option<String>,
    /// Do not send discovery beacons.
    #[arg(long)]
    pub no_beacon: bool,
    /// Beacon destination. Default: 255.255.255.255.
    #[arg(long, value_name = "IP", conflicts_with = "no_beacon")]
    pub broadcast: Option<IpAddr>,
    /// Roster sort field.
    #[arg(long, default_value = "name")]
    pub sort: SortArg,
    /// Sort descending.
    #[arg(long)]
    pub descending: bool,
}

#[derive(Args, Debug)]
pub struct IdentityArgs {
    /// Session port.
    #[arg(long, env = "PROCTORCAST_PORT")]
    pub port: u16,
    /// Agent id.
    #[arg(long, env = "PROCTORCAST_ID")]
    pub id: String,
    /// Agent display name.
    #[arg(long, env = "PROCTORCAST_NAME")]
    pub name: String,
    /// Observer address. Discovered by beacon when omitted.
    #[arg(long, value_name = "IP")]
    pub server: Option<IpAddr>,
    /// How long to wait for a beacon.
    #[arg(long, default_value = "10s")]
    pub discovery_timeout: String,
}

#[derive(Args, Debug)]
pub struct JoinArgs {
    #[command(flatten)]
    pub identity: IdentityArgs,
    /// Image files sent in turn as screen captures.
    #[arg(required = true, value_name = "IMAGE")]
    pub images: Vec<PathBuf>,
    /// Delay between images.
    #[arg(long, default_value = "500ms")]
    pub interval: String,
    /// Message sent once the stream is up.
    #[arg(long)]
    pub message: Option<String>,
    /// Stop after this long instead of waiting for Ctrl-C.
    #[arg(long)]
    pub duration: Option<String>,
}

#[derive(Args, Debug)]
pub struct DiscoverArgs {
    /// Session port.
    #[arg(long, env = "PROCTORCAST_PORT")]
    pub port: u16,
    /// How long to wait for a beacon.
    #[arg(long, default_value = "10s")]
    pub timeout: String,
    /// Local address to listen on.
    #[arg(long, value_name = "IP", default_value = "0.0.0.0")]
    pub listen: IpAddr,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    #[command(flatten)]
    pub identity: IdentityArgs,
    /// Text sent as a MESSAGE frame.
    #[arg(long, conflicts_with = "file")]
    pub message: Option<String>,
    /// File sent as an image frame.
    #[arg(long, conflicts_with = "message")]
    pub file: Option<PathBuf>,
    /// Frame type for --file.
    #[arg(long, default_value_t = proctorcast_frame::PICTURE, requires = "file")]
    pub tag: u16,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Parse `500ms`, `5s`, or bare seconds. Zero is rejected.
pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let duration = parse_duration_allow_zero(input)?;
    if duration.is_zero() {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }
    Ok(duration)
}

/// Like [`parse_duration`] but accepts zero.
pub fn parse_duration_allow_zero(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .trim()
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

pub fn build_runtime() -> CliResult<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("proctorcast")
        .build()
        .map_err(|err| CliError::new(INTERNAL, format!("runtime setup failed: {err}")))
}

/// Resolves when Ctrl-C arrives or `limit` elapses, whichever is first.
pub async fn wait_for_stop(limit: Option<Duration>) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %err, "ctrl-c handler unavailable");
            std::future::pending::<()>().await;
        }
    };
    let limit = async {
        match limit {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::select! {
        _ = ctrl_c => {}
        _ = limit => {}
    }
}
