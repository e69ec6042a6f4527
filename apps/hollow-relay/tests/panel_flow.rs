use std::io::{self, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use hollow_relay::panel::{run_render_loop, PanelSink, PanelView};
use hollow_relay::{PanelServer, SharedMonitor, StreamPublisher};
use relay_proto::{Action, MonitorUpdate, RecordingStatus};
use serde_json::json;

fn scratch_socket(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!("relay-it-{tag}-{}.sock", uuid::Uuid::new_v4()))
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

#[test_timeout::timeout]
fn published_update_is_merged_into_the_panel() {
    let path = scratch_socket("merge");
    let server = PanelServer::bind(&path, SharedMonitor::new()).expect("bind panel");

    let update = MonitorUpdate::new()
        .controller([Action::Jump])
        .obs_status(RecordingStatus::Recording);
    assert!(StreamPublisher::new(&path).send(&update));

    assert!(wait_until(Duration::from_secs(3), || {
        server.monitor().snapshot().frames_merged == 1
    }));
    let state = server.monitor().snapshot();
    assert!(state.controller_input.is_pressed(Action::Jump));
    assert!(!state.controller_input.is_pressed(Action::Attack));
    assert_eq!(state.obs_status, RecordingStatus::Recording);
}

#[test_timeout::timeout]
fn concurrent_publishers_both_land() {
    let path = scratch_socket("concurrent");
    let server = PanelServer::bind(&path, SharedMonitor::new()).expect("bind panel");

    let senders: Vec<_> = [
        MonitorUpdate::new().reward(5.0),
        MonitorUpdate::new().episode(3),
    ]
    .into_iter()
    .map(|update| {
        let path = path.clone();
        thread::spawn(move || StreamPublisher::new(path).send(&update))
    })
    .collect();
    for sender in senders {
        assert!(sender.join().expect("sender panicked"));
    }

    assert!(wait_until(Duration::from_secs(3), || {
        let state = server.monitor().snapshot();
        state.reward == 5.0 && state.episode == 3 && server.stats().merged() == 2
    }));
    assert_eq!(server.stats().failed(), 0);
}

#[test_timeout::timeout]
fn stale_socket_file_is_replaced() {
    let path = scratch_socket("stale");
    drop(UnixListener::bind(&path).expect("stale bind"));
    assert!(path.exists());

    let server = PanelServer::bind(&path, SharedMonitor::new()).expect("bind over stale file");
    assert!(StreamPublisher::new(&path).send(&MonitorUpdate::new().episode(1)));
    assert!(wait_until(Duration::from_secs(3), || {
        server.monitor().snapshot().episode == 1
    }));
}

#[test_timeout::timeout]
fn socket_file_is_removed_on_stop_and_drop() {
    let path = scratch_socket("cleanup");
    let mut server = PanelServer::bind(&path, SharedMonitor::new()).expect("bind panel");
    assert!(path.exists());
    server.stop();
    assert!(path.exists(), "file stays until the server is dropped");
    drop(server);
    assert!(!path.exists());

    let path = scratch_socket("cleanup-drop");
    let server = PanelServer::bind(&path, SharedMonitor::new()).expect("bind panel");
    drop(server);
    assert!(!path.exists());
    assert!(!StreamPublisher::new(&path).send(&MonitorUpdate::new().reward(1.0)));
}

#[test_timeout::timeout]
fn unknown_keys_and_bad_timestamps_leave_state_alone() {
    let path = scratch_socket("filter");
    let server = PanelServer::bind(&path, SharedMonitor::new()).expect("bind panel");
    let before = server.monitor().snapshot();
    let publisher = StreamPublisher::new(&path);

    assert!(publisher.send(&json!({"x": 1})));
    assert!(publisher.send(&json!({"start_time": "not a time", "episode": 8})));

    assert!(wait_until(Duration::from_secs(3), || server.stats().merged() == 2));
    let after = server.monitor().snapshot();
    assert_eq!(after.start_time, before.start_time);
    assert_eq!(after.episode, 8);
    assert_eq!(after.frames_merged, 1);
}

#[test_timeout::timeout]
fn truncated_frame_is_dropped_and_panel_keeps_serving() {
    let path = scratch_socket("truncated");
    let server = PanelServer::bind(&path, SharedMonitor::new()).expect("bind panel");

    let mut raw = UnixStream::connect(&path).expect("connect");
    raw.write_all(&64u32.to_be_bytes()).expect("prefix");
    raw.write_all(b"{\"reward\"").expect("partial body");
    drop(raw);

    assert!(wait_until(Duration::from_secs(3), || server.stats().failed() == 1));
    assert!(StreamPublisher::new(&path).send(&MonitorUpdate::new().reward(2.0)));
    assert!(wait_until(Duration::from_secs(3), || {
        server.monitor().snapshot().reward == 2.0
    }));
}

#[derive(Clone, Default)]
struct RecordingSink {
    views: Arc<Mutex<Vec<PanelView>>>,
}

impl PanelSink for RecordingSink {
    fn draw(&mut self, view: &PanelView) -> io::Result<()> {
        self.views.lock().expect("views lock").push(view.clone());
        Ok(())
    }
}

#[test_timeout::timeout]
fn render_loop_picks_up_published_updates() {
    let path = scratch_socket("render");
    let server = PanelServer::bind(&path, SharedMonitor::new()).expect("bind panel");
    let monitor = server.monitor().clone();
    let shutdown = Arc::new(AtomicBool::new(false));
    let sink = RecordingSink::default();

    let render = {
        let shutdown = Arc::clone(&shutdown);
        let mut sink = sink.clone();
        thread::spawn(move || {
            run_render_loop(&monitor, &mut sink, Duration::from_millis(10), &shutdown)
        })
    };

    assert!(StreamPublisher::new(&path).send(&MonitorUpdate::new().episode(42)));
    let seen = wait_until(Duration::from_secs(3), || {
        sink.views
            .lock()
            .expect("views lock")
            .iter()
            .any(|view| view.episode == 42)
    });
    shutdown.store(true, Ordering::Release);
    let frames = render.join().expect("render thread");

    assert!(seen);
    assert!(frames >= 1);
    drop(server);
}
