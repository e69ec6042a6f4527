use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_HOST: &str = "HOLLOW_RELAY_HOST";
pub const ENV_PORT: &str = "HOLLOW_RELAY_PORT";
pub const ENV_GAME_ADDR: &str = "HOLLOW_RELAY_GAME_ADDR";
pub const ENV_RUNTIME_DIR: &str = "HOLLOW_RELAY_RUNTIME_DIR";
pub const ENV_APP_ID: &str = "HOLLOW_RELAY_APP_ID";
pub const ENV_RENDER_HZ: &str = "HOLLOW_RELAY_RENDER_HZ";

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 9999;
pub const DEFAULT_GAME_ADDR: &str = "127.0.0.1:9998";
pub const DEFAULT_APP_ID: &str = "hollow-relay";
pub const DEFAULT_RENDER_HZ: u32 = 10;
pub const RENDER_HZ_RANGE: std::ops::RangeInclusive<u32> = 1..=60;

/// Resolved relay configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Host the datagram receiver binds to.
    pub datagram_host: String,
    pub datagram_port: u16,
    /// Where the game mod listens for input datagrams.
    pub game_addr: String,
    /// Directory holding the panel socket.
    pub runtime_dir: PathBuf,
    pub app_id: String,
    pub render_hz: u32,
}

impl RelayConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            datagram_host: env::var(ENV_HOST).unwrap_or(defaults.datagram_host),
            datagram_port: env::var(ENV_PORT)
                .ok()
                .and_then(|port| port.trim().parse().ok())
                .unwrap_or(defaults.datagram_port),
            game_addr: env::var(ENV_GAME_ADDR).unwrap_or(defaults.game_addr),
            runtime_dir: env::var_os(ENV_RUNTIME_DIR)
                .map(PathBuf::from)
                .unwrap_or(defaults.runtime_dir),
            app_id: env::var(ENV_APP_ID).unwrap_or(defaults.app_id),
            render_hz: env::var(ENV_RENDER_HZ)
                .ok()
                .and_then(|hz| hz.trim().parse().ok())
                .map(clamp_render_hz)
                .unwrap_or(defaults.render_hz),
        }
    }

    pub fn datagram_addr(&self) -> String {
        format!("{}:{}", self.datagram_host, self.datagram_port)
    }

    pub fn panel_socket_path(&self) -> PathBuf {
        panel_socket_path(&self.runtime_dir, &self.app_id, current_uid())
    }

    pub fn render_interval(&self) -> Duration {
        Duration::from_millis(1_000 / u64::from(clamp_render_hz(self.render_hz)))
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            datagram_host: DEFAULT_HOST.to_string(),
            datagram_port: DEFAULT_PORT,
            game_addr: DEFAULT_GAME_ADDR.to_string(),
            runtime_dir: default_runtime_dir(),
            app_id: DEFAULT_APP_ID.to_string(),
            render_hz: DEFAULT_RENDER_HZ,
        }
    }
}

pub fn clamp_render_hz(hz: u32) -> u32 {
    hz.clamp(*RENDER_HZ_RANGE.start(), *RENDER_HZ_RANGE.end())
}

/// `<dir>/<app-id>-monitor-<uid>.sock`
pub fn panel_socket_path(dir: &Path, app_id: &str, uid: u32) -> PathBuf {
    dir.join(format!("{app_id}-monitor-{uid}.sock"))
}

/// `$XDG_RUNTIME_DIR` when the platform has one, else the temp dir.
pub fn default_runtime_dir() -> PathBuf {
    directories::BaseDirs::new()
        .and_then(|dirs| dirs.runtime_dir().map(Path::to_path_buf))
        .unwrap_or_else(env::temp_dir)
}

pub fn current_uid() -> u32 {
    // SAFETY: getuid has no preconditions and cannot fail.
    unsafe { libc::getuid() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{LazyLock, Mutex};

    // Environment variable tests must not interleave.
    static ENV_MUTEX: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

    const ALL_VARS: [&str; 6] = [
        ENV_HOST,
        ENV_PORT,
        ENV_GAME_ADDR,
        ENV_RUNTIME_DIR,
        ENV_APP_ID,
        ENV_RENDER_HZ,
    ];

    fn clear_env() -> Vec<(&'static str, Option<String>)> {
        ALL_VARS
            .iter()
            .map(|var| {
                let saved = env::var(var).ok();
                env::remove_var(var);
                (*var, saved)
            })
            .collect()
    }

    fn restore_env(saved: Vec<(&'static str, Option<String>)>) {
        for (var, value) in saved {
            match value {
                Some(value) => env::set_var(var, value),
                None => env::remove_var(var),
            }
        }
    }

    #[test]
    fn socket_path_combines_dir_app_and_uid() {
        let path = panel_socket_path(Path::new("/run/user/1000"), "hollow-relay", 1000);
        assert_eq!(
            path,
            PathBuf::from("/run/user/1000/hollow-relay-monitor-1000.sock")
        );
    }

    #[test]
    fn default_config_uses_loopback() {
        let config = RelayConfig::default();
        assert_eq!(config.datagram_addr(), "127.0.0.1:9999");
        assert_eq!(config.render_interval(), Duration::from_millis(100));
    }

    #[test]
    fn from_env_defaults_when_unset() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let saved = clear_env();

        let config = RelayConfig::from_env();
        assert_eq!(config.datagram_port, DEFAULT_PORT);
        assert_eq!(config.app_id, DEFAULT_APP_ID);

        restore_env(saved);
    }

    #[test]
    fn from_env_reads_overrides() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let saved = clear_env();

        env::set_var(ENV_PORT, "4242");
        env::set_var(ENV_RUNTIME_DIR, "/tmp/relay-test");
        env::set_var(ENV_APP_ID, "trainer");
        env::set_var(ENV_RENDER_HZ, "500");
        let config = RelayConfig::from_env();
        assert_eq!(config.datagram_port, 4242);
        assert_eq!(config.render_hz, 60);
        assert_eq!(
            config.panel_socket_path(),
            PathBuf::from(format!("/tmp/relay-test/trainer-monitor-{}.sock", current_uid()))
        );

        restore_env(saved);
    }

    #[test]
    fn unparsable_port_falls_back() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let saved = clear_env();

        env::set_var(ENV_PORT, "not-a-port");
        assert_eq!(RelayConfig::from_env().datagram_port, DEFAULT_PORT);

        restore_env(saved);
    }
}
