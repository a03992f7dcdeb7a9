use std::sync::Arc;
use std::time::Duration;

use proctorcast_peer::{ImageCrateDecoder, Server, ServerConfig, ServerHandle};
use proctorcast_roster::{ImageCache, StudentRegistry};
use tracing::info;

use crate::cmd::{build_runtime, parse_duration, parse_duration_allow_zero, wait_for_stop, ServeArgs};
use crate::exit::{peer_error, CliResult, SUCCESS};
use crate::output::{print_roster, OutputFormat, Preview, RosterEntry};

pub fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    let grace = parse_duration_allow_zero(&args.grace)?;
    let interval = parse_duration(&args.interval)?;
    let limit = args.duration.as_deref().map(parse_duration).transpose()?;

    let mut config = ServerConfig::new(args.port)
        .with_bind_ip(args.bind)
        .with_grace_period(grace)
        .with_beacon(!args.no_beacon);
    if let Some(target) = args.broadcast {
        config.discovery.target = target;
    }

    let registry = Arc::new(StudentRegistry::new());
    registry.set_sort_field(args.sort.into());
    if args.descending {
        registry.toggle_sort_direction();
    }

    build_runtime()?.block_on(serve(config, registry, interval, limit, format))
}

async fn serve(
    config: ServerConfig,
    registry: Arc<StudentRegistry>,
    interval: Duration,
    limit: Option<Duration>,
    format: OutputFormat,
) -> CliResult<i32> {
    let server = Server::start(config, registry.clone(), Arc::new(ImageCrateDecoder))
        .await
        .map_err(|err| peer_error("serve failed", err))?;

    let cache = ImageCache::new(Preview::render);
    tokio::select! {
        _ = wait_for_stop(limit) => {}
        _ = report_loop(&registry, &cache, &server, interval, format) => {}
    }

    server.shutdown().await;
    print_roster(&snapshot(&registry, &cache), format);

    registry.clear();
    cache.clear();
    info!("session closed");
    Ok(SUCCESS)
}

async fn report_loop(
    registry: &StudentRegistry,
    cache: &ImageCache<Preview>,
    server: &ServerHandle,
    interval: Duration,
    format: OutputFormat,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if !server.is_running() {
            return;
        }
        print_roster(&snapshot(registry, cache), format);
    }
}

/// Sorted roster paired with cached previews; drops previews of departed agents.
fn snapshot(registry: &StudentRegistry, cache: &ImageCache<Preview>) -> Vec<RosterEntry> {
    let students = registry.get_sorted();
    cache.retain_ids(students.iter().map(|student| student.id()));
    students
        .into_iter()
        .map(|student| {
            let preview = cache.get_or_build(&student);
            (student, preview)
        })
        .collect()
}
