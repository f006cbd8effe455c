//! The database worker (spec.md C7) and its query catalogue (C8). A single dedicated OS thread
//! owns one long-lived `mysql::Conn` (the "one long-lived DB session" requirement in §4.7); the
//! synchronous `mysql` crate is the right fit precisely because this worker is deliberately
//! single-threaded and blocking, needing no executor of its own.

use crate::session::{AuthSession, SessionId};
use flux::logging::{info, warn, Logger};
use mysql::prelude::Queryable;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// The prepared-query catalogue keyed by this enum (spec.md §4.8). Closed over every query the
/// protocol issues, so an "unknown query id" is a compile error rather than a runtime one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryId {
    SelAccountIdByName,
    CheckPassword,
    InsLogWrongPassword,
    DelPrevSessions,
    InsNewSession,
    UpdOnLogin,
    KeepAlive,
}

/// A small value enum so callers never depend on `mysql::Value` directly — conversion only
/// happens at the thinnest wrapper, `LoginDatabase::execute` (§9 "adopt a single result-type
/// discipline ... only convert at the thinnest wrapper").
#[derive(Debug, Clone)]
pub enum SqlValue {
    Str(String),
    U64(u64),
    Bytes(Vec<u8>),
}

impl SqlValue {
    fn as_str(&self) -> &str {
        match self {
            SqlValue::Str(s) => s.as_str(),
            _ => panic!("bind parameter type mismatch: expected Str"),
        }
    }

    fn as_u64(&self) -> u64 {
        match self {
            SqlValue::U64(v) => *v,
            _ => panic!("bind parameter type mismatch: expected U64"),
        }
    }

    fn as_bytes(&self) -> &[u8] {
        match self {
            SqlValue::Bytes(b) => b.as_slice(),
            _ => panic!("bind parameter type mismatch: expected Bytes"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum SqlResult {
    AccountId(Option<u64>),
    Password(Option<String>),
    Ack,
}

/// A weak back-reference from an in-flight `DBRequest` to the session that created it, plus the
/// session's monotonic id. Design Note §9: represent the session as a reference-counted handle,
/// pass only a weak clone into the callback, and re-upgrade inside the callback. Checking the id
/// in addition to the `Weak` upgrade rejects stale reuse of a reclaimed slot even in the (remote)
/// case an unrelated, still-alive session occupies the same allocation.
#[derive(Clone)]
pub struct CancelToken {
    session: Weak<Mutex<AuthSession>>,
    session_id: SessionId,
}

impl CancelToken {
    pub fn new(session: &Arc<Mutex<AuthSession>>, session_id: SessionId) -> CancelToken {
        CancelToken { session: Arc::downgrade(session), session_id }
    }

    pub fn is_expired(&self) -> bool {
        match self.session.upgrade() {
            Some(session) => session.lock().expect("session mutex poisoned").id() != self.session_id,
            None => true,
        }
    }

    /// Re-acquires the strong reference iff the session is still alive and is still the same
    /// session this token was issued for.
    pub fn upgrade(&self) -> Option<Arc<Mutex<AuthSession>>> {
        let strong = self.session.upgrade()?;
        let still_same = strong.lock().expect("session mutex poisoned").id() == self.session_id;
        if still_same {
            Some(strong)
        } else {
            None
        }
    }
}

pub struct DBRequest {
    pub query_id: QueryId,
    pub bind_params: Vec<SqlValue>,
    pub fire_and_forget: bool,
    pub creation_time: Instant,
    pub cancel: Option<CancelToken>,
    pub callback: Option<Box<dyn FnOnce(SqlResult) + Send>>,
    pub sql_result: Option<SqlResult>,
}

impl DBRequest {
    pub fn new(query_id: QueryId, bind_params: Vec<SqlValue>) -> DBRequest {
        DBRequest {
            query_id,
            bind_params,
            fire_and_forget: true,
            creation_time: Instant::now(),
            cancel: None,
            callback: None,
            sql_result: None,
        }
    }

    pub fn with_callback(
        mut self,
        cancel: CancelToken,
        callback: impl FnOnce(SqlResult) + Send + 'static,
    ) -> DBRequest {
        self.fire_and_forget = false;
        self.cancel = Some(cancel);
        self.callback = Some(Box::new(callback));
        self
    }
}

#[derive(Clone)]
pub struct DbOpts {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub schema: String,
}

fn connect(opts: &DbOpts, log: &Logger) -> Option<mysql::Conn> {
    let builder = mysql::OptsBuilder::new()
        .ip_or_hostname(Some(opts.host.clone()))
        .tcp_port(opts.port)
        .user(Some(opts.user.clone()))
        .pass(Some(opts.password.clone()))
        .db_name(Some(opts.schema.clone()));

    match mysql::Conn::new(builder) {
        Ok(conn) => Some(conn),
        Err(e) => {
            warn!(log, "database connection failed"; "error" => %e);
            None
        }
    }
}

/// Pure catalogue: given a connection, a query id, and bind parameters, runs the matching
/// statement. `prepare` in spec.md's vocabulary; here it both prepares and executes since `mysql`
/// has no use for a detached statement handle outside the connection that will run it.
pub struct LoginDatabase;

impl LoginDatabase {
    pub fn execute(conn: &mut mysql::Conn, query_id: QueryId, params: &[SqlValue]) -> mysql::Result<SqlResult> {
        match query_id {
            QueryId::SelAccountIdByName => {
                let id: Option<u64> =
                    conn.exec_first("SELECT id FROM users WHERE username = ?", (params[0].as_str(),))?;
                Ok(SqlResult::AccountId(id))
            }
            QueryId::CheckPassword => {
                let password: Option<String> =
                    conn.exec_first("SELECT password FROM users WHERE id = ?", (params[0].as_u64(),))?;
                Ok(SqlResult::Password(password))
            }
            QueryId::InsLogWrongPassword => {
                conn.exec_drop(
                    "INSERT INTO logs_actions (ip, username, action) VALUES (?, ?, ?)",
                    (params[0].as_str(), params[1].as_str(), "WRONG_PASSWORD"),
                )?;
                Ok(SqlResult::Ack)
            }
            QueryId::DelPrevSessions => {
                conn.exec_drop("DELETE FROM active_sessions WHERE userid = ?", (params[0].as_u64(),))?;
                Ok(SqlResult::Ack)
            }
            QueryId::InsNewSession => {
                conn.exec_drop(
                    "INSERT INTO active_sessions (userid, sessionkey, authip, greetcode) VALUES (?, ?, ?, ?)",
                    (params[0].as_u64(), params[1].as_bytes(), params[2].as_str(), params[3].as_bytes()),
                )?;
                Ok(SqlResult::Ack)
            }
            QueryId::UpdOnLogin => Ok(SqlResult::Ack),
            QueryId::KeepAlive => {
                conn.query_drop("SELECT 1")?;
                Ok(SqlResult::Ack)
            }
        }
    }
}

/// The dedicated DB thread: an ingress queue (any thread enqueues), a condition variable to wake
/// it, and an egress queue the server's DB-drain timer pops from (spec.md §4.7/§4.9).
pub struct DatabaseWorker {
    ingress: Arc<(Mutex<Vec<DBRequest>>, Condvar)>,
    egress: Arc<Mutex<Vec<DBRequest>>>,
    running: Arc<AtomicBool>,
    join_handle: Option<JoinHandle<()>>,
}

impl DatabaseWorker {
    pub fn spawn(opts: DbOpts, db_down_timeout: Duration, log: Logger) -> DatabaseWorker {
        let ingress = Arc::new((Mutex::new(Vec::new()), Condvar::new()));
        let egress = Arc::new(Mutex::new(Vec::new()));
        let running = Arc::new(AtomicBool::new(true));

        let worker_ingress = Arc::clone(&ingress);
        let worker_egress = Arc::clone(&egress);
        let worker_running = Arc::clone(&running);

        let join_handle = std::thread::Builder::new()
            .name("db-worker".to_string())
            .spawn(move || run(worker_ingress, worker_egress, worker_running, opts, db_down_timeout, log))
            .expect("failed to spawn db worker thread");

        DatabaseWorker { ingress, egress, running, join_handle: Some(join_handle) }
    }

    pub fn enqueue(&self, req: DBRequest) {
        let (lock, cvar) = &*self.ingress;
        lock.lock().expect("db ingress mutex poisoned").push(req);
        cvar.notify_one();
    }

    /// The server's DB-drain timer (~1s) calls this, then runs each result's callback itself —
    /// which, because callbacks only ever lock the target session's own mutex, preserves
    /// per-session serialization without this worker needing to know which OS thread owns that
    /// session.
    pub fn take_responses(&self) -> Vec<DBRequest> {
        std::mem::take(&mut *self.egress.lock().expect("db egress mutex poisoned"))
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.ingress.1.notify_all();
    }

    pub fn join(&mut self) {
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.join();
        }
    }
}

fn run(
    ingress: Arc<(Mutex<Vec<DBRequest>>, Condvar)>,
    egress: Arc<Mutex<Vec<DBRequest>>>,
    running: Arc<AtomicBool>,
    opts: DbOpts,
    db_down_timeout: Duration,
    log: Logger,
) {
    let mut conn = connect(&opts, &log);
    if conn.is_some() {
        info!(log, "database connection established");
    }

    loop {
        let mut local = {
            let (lock, cvar) = &*ingress;
            let mut guard = lock.lock().expect("db ingress mutex poisoned");
            while guard.is_empty() && running.load(Ordering::SeqCst) {
                let (g, _timeout) = cvar
                    .wait_timeout(guard, Duration::from_millis(200))
                    .expect("db ingress condvar poisoned");
                guard = g;
            }
            if guard.is_empty() && !running.load(Ordering::SeqCst) {
                break;
            }
            std::mem::take(&mut *guard)
        };

        for mut req in local.drain(..) {
            if req.cancel.as_ref().map(|c| c.is_expired()).unwrap_or(false) {
                continue;
            }

            if conn.is_none() {
                conn = reconnect_until(&opts, &req, db_down_timeout, &log);
                if conn.is_some() {
                    info!(log, "database connection restored");
                }
            }

            let connection = match conn.as_mut() {
                Some(c) => c,
                None => {
                    warn!(log, "dropping request: database unavailable past timeout";
                        "query" => ?req.query_id, "age_ms" => req.creation_time.elapsed().as_millis() as u64);
                    continue;
                }
            };

            match LoginDatabase::execute(connection, req.query_id, &req.bind_params) {
                Ok(result) => {
                    if req.fire_and_forget {
                        continue;
                    }
                    req.sql_result = Some(result);
                    egress.lock().expect("db egress mutex poisoned").push(req);
                }
                Err(e) => {
                    warn!(log, "query failed, will reconnect"; "query" => ?req.query_id, "error" => %e);
                    conn = None;
                }
            }
        }
    }
}

/// Retries opening the persistent session every second until it succeeds, the request's age
/// exceeds `db_down_timeout`, or its cancel token expires (spec.md §4.7 step 3.b).
fn reconnect_until(opts: &DbOpts, req: &DBRequest, db_down_timeout: Duration, log: &Logger) -> Option<mysql::Conn> {
    loop {
        if let Some(conn) = connect(opts, log) {
            return Some(conn);
        }

        if req.creation_time.elapsed() > db_down_timeout {
            return None;
        }
        if req.cancel.as_ref().map(|c| c.is_expired()).unwrap_or(false) {
            return None;
        }

        std::thread::sleep(Duration::from_secs(1));
    }
}
