use authenticator::server;
use clap::{App, Arg};
use std::path::Path;
use std::process;

pub fn main() {
    let matches = App::new("Authenticator Service")
        .version("1.0")
        .author("Bush Hammer Industries")
        .about("TLS socket authenticator for the login handshake.")
        .arg(Arg::with_name("CONFIG_FILE").help("Path to the KEY = VALUE; config file").required(true))
        .arg(
            Arg::with_name("cert")
                .long("cert")
                .takes_value(true)
                .default_value("server.pem")
                .help("Path to the TLS certificate chain"),
        )
        .arg(
            Arg::with_name("key")
                .long("key")
                .takes_value(true)
                .default_value("pkey.pem")
                .help("Path to the TLS private key"),
        )
        .get_matches();

    let config_path = Path::new(matches.value_of("CONFIG_FILE").unwrap());
    let cert_path = Path::new(matches.value_of("cert").unwrap());
    let key_path = Path::new(matches.value_of("key").unwrap());

    if let Err(e) = server::run(config_path, cert_path, key_path) {
        eprintln!("authenticator failed to start: {}", e);
        process::exit(1);
    }
}
