//! Emits a default `KEY = VALUE;` config file (spec.md §6) an operator can then hand-tune.

use clap::{App, Arg};
use std::fs;
use std::io::Write;

const TEMPLATE: &str = "\
# Authenticator config. Generated by gen_config; edit freely.

ConsoleLoggingEnabled = true;
FileLoggingEnabled = false;

MANAGER_SERVER_PORT = 61531;
NETWORK_THREADS_COUNT = -1;
MAX_CONNECTED_CLIENTS_PER_THREAD = -1;

ENABLE_SPAM_PREVENTION = true;
MAX_CONNECTION_ATTEMPTS_PER_MINUTE = 5;
CONNECTION_ATTEMPT_CLEANUP_INTERVAL_MIN = 5;

HANDSHAKING_AND_IDLE_TIMEOUT_MS = 10000;
CONNECTED_AND_IDLE_TIMEOUT_MS = 120000;
DATABASE_ALIVE_HANDLER_UPDATE_INTERVAL_MS = 60000;
IP_BASED_REQUEST_CLEANUP_INTERVAL_MS = 60000;
DATABASE_CALLBACK_CHECK_INTERVAL_MS = 1000;

CLIENT_VERSION_MAJOR = 1;
CLIENT_VERSION_MINOR = 0;
CLIENT_VERSION_REVISION = 0;

DB_HOST = 127.0.0.1;
DB_PORT = 33060;
DB_USER = authenticator;
DB_PASSWORD = ;
DB_SCHEMA = authdb;
";

fn main() {
    let matches = App::new("Config Generator")
        .version("1.0")
        .author("Bush Hammer Industries")
        .about("Writes a default authenticator config file.")
        .arg(Arg::with_name("CONFIG_FILE").help("Path to write the config file to").required(true))
        .get_matches();

    let config_file_path = matches.value_of("CONFIG_FILE").unwrap();

    let mut file = fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(config_file_path)
        .expect("failed to open config file for writing");

    file.write_all(TEMPLATE.as_bytes()).expect("failed to write config file");
}
