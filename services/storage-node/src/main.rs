use crate::config::NodeConfig;
use crate::core::StorageNode;
use clap::{App, Arg};
use galileo::dht::network::NetworkInfo;
use orbit::env;
use orbit::logging;
use std::path::Path;
use std::thread;
use std::time::Duration;

mod config;
mod core;

const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

pub fn main() {
    let matches = App::new("Galileo Storage Node")
        .version("1.0")
        .author("Galileo Project")
        .about("Runs a storage node.")
        .arg(
            Arg::with_name("NETWORK_FILE")
                .help("Path to the overlay description file")
                .required(true),
        )
        .arg(
            Arg::with_name("config")
                .long("config")
                .short("c")
                .takes_value(true)
                .help("Path to the node configuration file"),
        )
        .arg(
            Arg::with_name("port")
                .long("port")
                .short("p")
                .takes_value(true)
                .help("Listen port override"),
        )
        .arg(
            Arg::with_name("log-level")
                .long("log-level")
                .takes_value(true)
                .default_value("info")
                .help("Log verbosity"),
        )
        .get_matches();

    let logger = logging::init(matches.value_of("log-level").unwrap());

    let mut config = match matches.value_of("config") {
        Some(path) => NodeConfig::load(path),
        None => {
            // Fall back to the config directory, then to built-in defaults
            let conf_dir = env::var_or(env::CONF_DIR, ".");
            let default_path = Path::new(&conf_dir).join("node.toml");

            if default_path.is_file() {
                NodeConfig::load(default_path)
            } else {
                NodeConfig::default()
            }
        }
    };

    if let Some(port) = matches.value_of("port") {
        config.server.port = port.parse().expect("Invalid port override");
    }

    let network_file = matches.value_of("NETWORK_FILE").unwrap();
    let network = match NetworkInfo::load(network_file) {
        Ok(network) => network,
        Err(err) => {
            logging::crit!(logger, "error loading overlay description";
                           "path" => network_file,
                           "error" => %err);
            std::process::exit(1);
        }
    };

    logging::info!(logger, "overlay loaded";
                   "path" => network_file,
                   "nodes" => network.len());

    let node = match StorageNode::start(&config, network, &logger) {
        Ok(node) => node,
        Err(err) => {
            logging::crit!(logger, "startup failed"; "error" => %err);
            std::process::exit(1);
        }
    };

    // The main thread doubles as the housekeeping sweeper
    loop {
        thread::sleep(SWEEP_INTERVAL);
        node.sweep();
    }
}
