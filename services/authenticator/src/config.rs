//! Typed view over the `KEY = VALUE;` config file (spec.md §6), built on top of
//! `flux::config::Config`. This is the one place that knows the server's specific key names and
//! defaults; everything else consumes the typed `ServerConfig`.

use crate::account::ClientVersion;
use crate::db::DbOpts;
use crate::session::AuthConfig;
use flux::config::Config;
use std::sync::Arc;
use std::time::Duration;

pub struct ServerConfig {
    pub console_logging: bool,
    pub file_logging: bool,
    pub listen_port: u16,
    pub network_threads: i64,
    pub max_connected_per_thread: i64,
    pub spam_prevention: bool,
    pub max_attempts_per_minute: u32,
    pub ip_cleanup_interval: Duration,
    pub handshake_and_idle_timeout: Duration,
    pub connected_idle_timeout: Duration,
    pub keep_alive_interval: Duration,
    pub ip_based_cleanup_interval: Duration,
    pub db_callback_check_interval: Duration,
    pub expected_version: ClientVersion,
    pub db: DbOpts,
}

impl ServerConfig {
    pub fn from_file(config: &Config) -> ServerConfig {
        ServerConfig {
            console_logging: config.get_bool("ConsoleLoggingEnabled", true),
            file_logging: config.get_bool("FileLoggingEnabled", false),
            listen_port: config.get_u16("MANAGER_SERVER_PORT", 61531),
            network_threads: config.get_i64("NETWORK_THREADS_COUNT", -1),
            max_connected_per_thread: config.get_i64("MAX_CONNECTED_CLIENTS_PER_THREAD", -1),
            spam_prevention: config.get_bool("ENABLE_SPAM_PREVENTION", true),
            max_attempts_per_minute: config.get_i64("MAX_CONNECTION_ATTEMPTS_PER_MINUTE", 5).max(0) as u32,
            ip_cleanup_interval: minutes(config.get_i64("CONNECTION_ATTEMPT_CLEANUP_INTERVAL_MIN", 5)),
            handshake_and_idle_timeout: millis(config.get_i64("HANDSHAKING_AND_IDLE_TIMEOUT_MS", 10_000)),
            connected_idle_timeout: millis(config.get_i64("CONNECTED_AND_IDLE_TIMEOUT_MS", 120_000)),
            keep_alive_interval: millis(config.get_i64("DATABASE_ALIVE_HANDLER_UPDATE_INTERVAL_MS", 60_000)),
            ip_based_cleanup_interval: millis(config.get_i64("IP_BASED_REQUEST_CLEANUP_INTERVAL_MS", 60_000)),
            db_callback_check_interval: millis(config.get_i64("DATABASE_CALLBACK_CHECK_INTERVAL_MS", 1_000)),
            expected_version: ClientVersion {
                major: config.get_i64("CLIENT_VERSION_MAJOR", 1) as u8,
                minor: config.get_i64("CLIENT_VERSION_MINOR", 0) as u8,
                revision: config.get_i64("CLIENT_VERSION_REVISION", 0) as u8,
            },
            db: DbOpts {
                host: config.get_string("DB_HOST", "127.0.0.1"),
                port: config.get_u16("DB_PORT", 33060),
                user: config.get_string("DB_USER", "authenticator"),
                password: config.get_string("DB_PASSWORD", ""),
                schema: config.get_string("DB_SCHEMA", "authdb"),
            },
        }
    }

    pub fn network_thread_count(&self) -> usize {
        if self.network_threads < 0 {
            std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
        } else {
            self.network_threads as usize
        }
    }

    pub fn auth_config(&self) -> Arc<AuthConfig> {
        Arc::new(AuthConfig {
            expected_version: self.expected_version,
            handshake_timeout: self.handshake_and_idle_timeout,
            idle_timeout: self.connected_idle_timeout,
            max_accepted_size: 256,
        })
    }
}

fn millis(n: i64) -> Duration {
    Duration::from_millis(n.max(0) as u64)
}

fn minutes(n: i64) -> Duration {
    Duration::from_secs(n.max(0) as u64 * 60)
}
