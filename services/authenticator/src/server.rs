//! Process orchestration (spec.md C9): loads config, builds the TLS context, starts the database
//! worker and the network thread pool, then runs the accept loop and the three periodic timers
//! (keep-alive, per-ip cleanup, DB-callback drain) on the main thread until the process is killed.

use crate::account::ClientVersion;
use crate::config::ServerConfig;
use crate::db::{DBRequest, DatabaseWorker, QueryId};
use crate::session::AuthSession;
use flux::acceptor::Acceptor;
use flux::config::Config;
use flux::logging::{self, info, o, warn, Logger};
use flux::manager::{AdmissionConfig, SocketManager};
use flux::session::NetworkThread;
use flux::tls::{self, TlsRole};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Past this much time stuck waiting on a dead database connection, a request is dropped rather
/// than retried forever (spec.md §4.7 step 3.b).
const DB_DOWN_TIMEOUT: Duration = Duration::from_secs(30);

pub fn run(config_path: &Path, cert_path: &Path, key_path: &Path) -> Result<(), String> {
    let raw_config = Config::load(config_path).map_err(|e| e.to_string())?;
    let config = ServerConfig::from_file(&raw_config);

    let log = logging::init(&logging::LoggingOptions {
        console: config.console_logging,
        file: config.file_logging,
        file_path: Path::new("authenticator.log"),
        level: sloggers::types::Severity::Info,
    });

    info!(log, "starting authenticator";
        "expected_version" => version_string(config.expected_version),
        "listen_port" => config.listen_port);

    let tls_config = tls::build_server_config(cert_path, key_path).map_err(|e| format!("tls setup failed: {}", e))?;
    let role = TlsRole::Server(tls_config);

    let db = Arc::new(DatabaseWorker::spawn(config.db.clone(), DB_DOWN_TIMEOUT, log.new(o!("component" => "db-worker"))));
    let auth_config = config.auth_config();

    let thread_count = config.network_thread_count().max(1);
    let mut handles = Vec::with_capacity(thread_count);
    let mut join_handles = Vec::with_capacity(thread_count);

    for id in 0..thread_count {
        let thread = NetworkThread::<AuthSession>::new(id, log.new(o!("component" => "network-thread", "id" => id)))
            .map_err(|e| format!("failed to create network thread {}: {}", id, e))?;
        handles.push(thread.handle());
        join_handles.push(thread.spawn());
    }

    let admission = AdmissionConfig {
        max_per_thread: config.max_connected_per_thread,
        spam_prevention: config.spam_prevention,
        max_attempts_per_minute: config.max_attempts_per_minute,
        ip_cleanup_window: config.ip_cleanup_interval,
    };
    let manager = Arc::new(SocketManager::new(handles, admission, log.new(o!("component" => "socket-manager"))));

    let addr: SocketAddr =
        format!("0.0.0.0:{}", config.listen_port).parse().map_err(|e| format!("bad listen address: {}", e))?;
    let acceptor =
        Acceptor::bind(addr, log.new(o!("component" => "acceptor"))).map_err(|e| format!("bind failed: {}", e))?;

    let accept_manager = Arc::clone(&manager);
    let accept_role = role.clone();
    let accept_auth_config = Arc::clone(&auth_config);
    let accept_db = Arc::clone(&db);
    let accept_log = log.new(o!("component" => "acceptor-sink"));
    acceptor.spawn(move |stream, remote| {
        let construct_role = accept_role.clone();
        let construct_auth_config = Arc::clone(&accept_auth_config);
        let construct_db = Arc::clone(&accept_db);
        let construct_log = accept_log.clone();
        accept_manager.on_accepted(stream, remote, move |stream, _thread| {
            match AuthSession::construct(stream, &construct_role, construct_auth_config, construct_db, construct_log.clone()) {
                Ok(session) => Some(session),
                Err(e) => {
                    warn!(construct_log, "failed to construct session"; "peer" => %remote, "error" => ?e);
                    None
                }
            }
        });
    });

    run_periodic_timers(&config, &manager, &db);

    for handle in join_handles {
        let _ = handle.join();
    }

    Ok(())
}

fn run_periodic_timers(config: &ServerConfig, manager: &Arc<SocketManager<AuthSession>>, db: &Arc<DatabaseWorker>) {
    let mut last_keep_alive = std::time::Instant::now();
    let mut last_ip_cleanup = std::time::Instant::now();
    let mut last_db_drain = std::time::Instant::now();

    loop {
        std::thread::sleep(Duration::from_millis(50));
        let now = std::time::Instant::now();

        if now.duration_since(last_keep_alive) >= config.keep_alive_interval {
            last_keep_alive = now;
            db.enqueue(DBRequest::new(QueryId::KeepAlive, Vec::new()));
        }

        if now.duration_since(last_ip_cleanup) >= config.ip_based_cleanup_interval {
            last_ip_cleanup = now;
            manager.ip_request_cleanup();
        }

        if now.duration_since(last_db_drain) >= config.db_callback_check_interval {
            last_db_drain = now;
            for mut req in db.take_responses() {
                if let (Some(callback), Some(result)) = (req.callback.take(), req.sql_result.take()) {
                    callback(result);
                }
            }
        }
    }
}

fn version_string(v: ClientVersion) -> String {
    format!("{}.{}.{}", v.major, v.minor, v.revision)
}
