use crate::config::{self, RelayConfig};
use crate::game_link::GameLink;
use crate::panel::{run_render_loop, PanelServer, SharedMonitor, TerminalSink};
use crate::publisher::StreamPublisher;
use crate::receiver::DatagramReceiver;
use crate::shutdown;
use crate::store::StateStore;
use crate::terminal::cli::{
    self, Command, EndpointArgs, InputArgs, ListenArgs, PanelArgs, PublishArgs, SpawnPanelArgs,
};
use crate::terminal::error::CliError;
use crossbeam_channel::RecvTimeoutError;
use relay_proto::{Action, MonitorUpdate};
use serde_json::Value;
use std::collections::BTreeMap;
use std::env;
use std::io;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::info;

const LISTEN_POLL: Duration = Duration::from_millis(100);
const MIN_REPORT_INTERVAL: Duration = Duration::from_millis(50);

pub fn run(cli: cli::Cli) -> Result<(), CliError> {
    let config = cli::resolve_config(&cli.endpoints);
    match cli.command {
        Command::Panel(args) => run_panel(config, &cli.endpoints, args),
        Command::Listen(args) => run_listen(config, args),
        Command::Publish(args) => run_publish(&config, &cli.endpoints, args),
        Command::Input(args) => run_input(config, args),
        Command::SpawnPanel(args) => spawn_panel(&cli.endpoints, args),
    }
}

fn run_panel(
    mut config: RelayConfig,
    endpoints: &EndpointArgs,
    args: PanelArgs,
) -> Result<(), CliError> {
    if let Some(hz) = args.render_hz {
        config.render_hz = config::clamp_render_hz(hz);
    }
    let shutdown = shutdown::install()?;
    let mut server = PanelServer::bind(endpoints.socket_path(&config), SharedMonitor::new())?;
    let mut sink = TerminalSink::stdout()?;

    let frames = run_render_loop(
        server.monitor(),
        &mut sink,
        config.render_interval(),
        &shutdown,
    );
    server.stop();
    // Leave the shell prompt below the panel line.
    println!();
    info!(
        target: "relay::panel",
        frames,
        accepted = server.stats().accepted(),
        failed = server.stats().failed(),
        "panel exiting"
    );
    Ok(())
}

fn run_listen(mut config: RelayConfig, args: ListenArgs) -> Result<(), CliError> {
    if let Some(host) = args.host {
        config.datagram_host = host;
    }
    if let Some(port) = args.port {
        config.datagram_port = port;
    }
    let shutdown = shutdown::install()?;
    let store = Arc::new(StateStore::new());
    let mut receiver = DatagramReceiver::spawn(&config.datagram_addr(), Arc::clone(&store))?;
    println!("listening for game state on {}", receiver.local_addr());
    if args.request_state {
        let target = args.game_addr.unwrap_or_else(|| config.game_addr.clone());
        let link = receiver.game_link(&target)?;
        link.request_state()?;
        info!(target: "relay::game", peer = %link.peer_addr(), "requested full state");
    }

    let report_every = Duration::from_millis(args.report_ms).max(MIN_REPORT_INTERVAL);
    let ticker = crossbeam_channel::tick(report_every);
    while !shutdown::requested(&shutdown) {
        match ticker.recv_timeout(LISTEN_POLL) {
            Ok(_) => report(&store, &receiver, args.dump)?,
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    receiver.stop();
    Ok(())
}

fn report(store: &StateStore, receiver: &DatagramReceiver, dump: bool) -> Result<(), CliError> {
    let stats = receiver.stats();
    println!(
        "{}: {} keys | received {} applied {} unknown {} dropped {}",
        connection_status(store),
        store.len(),
        stats.received(),
        stats.applied(),
        stats.unknown(),
        stats.dropped()
    );
    if dump {
        let state = serde_json::to_string_pretty(&store.snapshot()).map_err(io::Error::from)?;
        println!("{state}");
    }
    Ok(())
}

fn connection_status(store: &StateStore) -> String {
    if !store.is_connected() {
        return "waiting for game".to_owned();
    }
    match store.last_update() {
        Some(at) => format!("connected, last update {}ms ago", at.elapsed().as_millis()),
        None => "connected".to_owned(),
    }
}

fn run_publish(
    config: &RelayConfig,
    endpoints: &EndpointArgs,
    args: PublishArgs,
) -> Result<(), CliError> {
    let payload = match &args.json {
        Some(raw) => {
            let value: Value = serde_json::from_str(raw)
                .map_err(|err| CliError::InvalidArgument(format!("--json: {err}")))?;
            if !value.is_object() {
                return Err(CliError::InvalidArgument(
                    "--json must be a JSON object".into(),
                ));
            }
            value
        }
        None => {
            let update = build_update(&args, OffsetDateTime::now_utc());
            if update.is_empty() {
                return Err(CliError::InvalidArgument(
                    "nothing to publish; pass a field flag or --json".into(),
                ));
            }
            serde_json::to_value(&update).map_err(io::Error::from)?
        }
    };

    let publisher = StreamPublisher::new(endpoints.socket_path(config))
        .with_timeout(Duration::from_millis(args.timeout_ms.max(1)));
    publisher.try_send(&payload)?;
    println!("update delivered to {}", publisher.socket_path().display());
    Ok(())
}

fn build_update(args: &PublishArgs, now: OffsetDateTime) -> MonitorUpdate {
    let mut update = MonitorUpdate::new();
    if let Some(reward) = args.reward {
        update = update.reward(reward);
    }
    if let Some(episode) = args.episode {
        update = update.episode(episode);
    }
    if let Some(status) = args.obs_status {
        update = update.obs_status(status.into());
    }
    if let Some(pressed) = &args.press {
        update = update.controller(pressed.iter().copied().map(Action::from));
    }
    if args.start_now {
        update = update.start_time(now);
    }
    if args.spawn_now {
        update = update.spawn_time(now);
    }
    update
}

fn run_input(config: RelayConfig, args: InputArgs) -> Result<(), CliError> {
    let target = args.game_addr.unwrap_or(config.game_addr);
    let link = GameLink::connect(&target)?;

    if args.reset {
        link.reset()?;
        println!("reset sent to {}", link.peer_addr());
        return Ok(());
    }

    let mut input = BTreeMap::new();
    for action in args.press {
        input.insert(Action::from(action), true);
    }
    for action in args.release {
        input.insert(Action::from(action), false);
    }
    let has_input = !input.is_empty();
    if has_input {
        link.send_input(input)?;
        println!("input sent to {}", link.peer_addr());
    }
    if args.get_state {
        link.request_state()?;
        println!("state requested from {}", link.peer_addr());
    } else if !has_input {
        return Err(CliError::InvalidArgument(
            "pass --press, --release, --reset, or --get-state".into(),
        ));
    }
    Ok(())
}

fn spawn_panel(endpoints: &EndpointArgs, args: SpawnPanelArgs) -> Result<(), CliError> {
    let exe = env::current_exe()?;
    let mut command = process::Command::new(&args.kitten);
    command
        .arg("panel")
        .arg(format!("--lines={}", args.lines))
        .arg("--edge=bottom")
        .arg(&exe);
    if let Some(dir) = &endpoints.runtime_dir {
        command.arg("--runtime-dir").arg(dir);
    }
    if let Some(app_id) = &endpoints.app_id {
        command.arg("--app-id").arg(app_id);
    }
    if let Some(socket) = &endpoints.socket {
        command.arg("--socket").arg(socket);
    }
    command.arg("panel");

    let child = command.spawn().map_err(|source| CliError::Launch {
        program: args.kitten.clone(),
        source,
    })?;
    println!("panel launched (pid {})", child.id());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terminal::cli::StatusArg;
    use relay_proto::RecordingStatus;
    use time::macros::datetime;

    #[test]
    fn build_update_includes_only_given_fields() {
        let args = PublishArgs {
            episode: Some(4),
            obs_status: Some(StatusArg::Idle),
            ..PublishArgs::default()
        };
        let update = build_update(&args, datetime!(2024-01-01 00:00 UTC));
        assert_eq!(
            update,
            MonitorUpdate::new()
                .episode(4)
                .obs_status(RecordingStatus::Idle)
        );
    }

    #[test]
    fn spawn_and_start_flags_stamp_the_same_instant() {
        let now = datetime!(2024-03-10 12:30 UTC);
        let args = PublishArgs {
            spawn_now: true,
            start_now: true,
            ..PublishArgs::default()
        };
        assert_eq!(
            build_update(&args, now),
            MonitorUpdate::new().spawn_time(now).start_time(now)
        );
    }

    #[test]
    fn status_reports_time_since_last_update() {
        let store = StateStore::new();
        assert_eq!(connection_status(&store), "waiting for game");
        store.replace(serde_json::Map::new());
        assert!(connection_status(&store).starts_with("connected, last update "));
    }

    #[test_timeout::timeout(10)]
    fn publish_honours_timeout_flag() {
        let dir = std::env::temp_dir().join(format!("relay-app-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("temp dir");
        let path = dir.join("panel.sock");
        let listener = std::os::unix::net::UnixListener::bind(&path).expect("bind");
        let endpoints = EndpointArgs {
            socket: Some(path.clone()),
            ..EndpointArgs::default()
        };
        let args = PublishArgs {
            episode: Some(1),
            timeout_ms: 100,
            ..PublishArgs::default()
        };
        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            relay_proto::decode::<_, Value>(&mut stream).expect("frame")
        });
        run_publish(&RelayConfig::default(), &endpoints, args).expect("publish");
        assert_eq!(server.join().expect("server"), serde_json::json!({"episode": 1}));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn empty_publish_is_rejected() {
        let err = run_publish(
            &RelayConfig::default(),
            &EndpointArgs::default(),
            PublishArgs::default(),
        )
        .unwrap_err();
        assert!(matches!(err, CliError::InvalidArgument(_)));
    }

    #[test]
    fn non_object_json_is_rejected() {
        let args = PublishArgs {
            json: Some("[1,2]".into()),
            ..PublishArgs::default()
        };
        let err = run_publish(&RelayConfig::default(), &EndpointArgs::default(), args).unwrap_err();
        assert!(matches!(err, CliError::InvalidArgument(_)));
    }
}
