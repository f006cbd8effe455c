use clap::{App, Arg};
use flux::logging::{self, info, o, warn};
use flux::session::NetworkThread;
use flux::tls::{self, TlsRole};
use hammer::config::RunConfig;
use hammer::report::Report;
use hammer::session::{Credentials, HammerSession};
use std::net::SocketAddr;
use std::path::Path;
use std::process;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn main() {
    let matches = App::new("Authenticator Hammer")
        .version("1.0")
        .author("Bush Hammer Industries")
        .about("Load-generates the authenticator login handshake.")
        .arg(Arg::with_name("TARGET").help("host:port of the authenticator to hit").required(true))
        .arg(
            Arg::with_name("trust-anchor")
                .long("trust-anchor")
                .takes_value(true)
                .default_value("server.pem")
                .help("PEM file the hammer trusts as the server's certificate"),
        )
        .arg(Arg::with_name("concurrency").long("concurrency").takes_value(true).default_value("10"))
        .arg(Arg::with_name("attempts").long("attempts").takes_value(true).default_value("100"))
        .arg(Arg::with_name("username-prefix").long("username-prefix").takes_value(true).default_value("hammer"))
        .arg(Arg::with_name("password").long("password").takes_value(true).default_value("password"))
        .get_matches();

    let target: SocketAddr = matches.value_of("TARGET").unwrap().parse().unwrap_or_else(|e| {
        eprintln!("invalid target address: {}", e);
        process::exit(1);
    });

    let concurrency: usize = matches.value_of("concurrency").unwrap().parse().expect("concurrency must be a number");
    let total_attempts: usize = matches.value_of("attempts").unwrap().parse().expect("attempts must be a number");

    let config = RunConfig {
        target,
        concurrency,
        total_attempts,
        client_version: (1, 0, 0),
        username_prefix: matches.value_of("username-prefix").unwrap().to_string(),
        password: matches.value_of("password").unwrap().to_string(),
        handshake_timeout: Duration::from_secs(10),
        reply_timeout: Duration::from_secs(10),
    };

    let log = logging::init(&logging::LoggingOptions::default());

    let trust_anchor = tls::build_client_config(Path::new(matches.value_of("trust-anchor").unwrap()))
        .unwrap_or_else(|e| {
            eprintln!("failed to load trust anchor: {}", e);
            process::exit(1);
        });
    let role = TlsRole::Client(trust_anchor, rustls::ServerName::IpAddress(target.ip()));

    let thread = NetworkThread::<HammerSession>::new(0, log.new(o!("component" => "network-thread")))
        .unwrap_or_else(|e| {
            eprintln!("failed to create network thread: {}", e);
            process::exit(1);
        });
    let handle = thread.handle();
    let join_handle = thread.spawn();

    let report = Arc::new(Mutex::new(Report::new()));
    let dispatched = Arc::new(AtomicUsize::new(0));

    info!(log, "starting hammer run"; "target" => %target, "concurrency" => concurrency, "attempts" => total_attempts);

    while dispatched.load(Ordering::Relaxed) < total_attempts {
        let batch = concurrency.min(total_attempts - dispatched.load(Ordering::Relaxed));
        for _ in 0..batch {
            let index = dispatched.fetch_add(1, Ordering::Relaxed);

            let creds = Credentials {
                username: format!("{}{}", config.username_prefix, index),
                password: config.password.clone(),
                client_version: config.client_version,
            };

            match HammerSession::connect(
                config.target,
                &role,
                creds,
                config.handshake_timeout,
                config.reply_timeout,
                Arc::clone(&report),
                log.new(o!("attempt" => index)),
            ) {
                Ok(session) => handle.queue_new(Arc::new(Mutex::new(session))),
                Err(e) => warn!(log, "failed to start hammer session"; "attempt" => index, "error" => ?e),
            }
        }

        std::thread::sleep(Duration::from_millis(50));
    }

    // Give the last dispatched batch time to finish its handshakes before reporting.
    std::thread::sleep(config.reply_timeout + Duration::from_secs(1));

    report.lock().expect("report mutex poisoned").print();

    drop(join_handle);
}
