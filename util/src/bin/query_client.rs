use clap::{App, Arg};
use galileo::client::Client;
use galileo::net::shared::{Destination, NetworkError};
use orbit::logging;
use std::time::Duration;

pub fn main() {
    let matches = App::new("Galileo Query Client")
        .version("1.0")
        .author("Galileo Project")
        .about("Runs a feature query against the overlay.")
        .arg(
            Arg::with_name("NODE")
                .help("Node address as host:port")
                .required(true),
        )
        .arg(
            Arg::with_name("QUERY")
                .help("Feature predicate, e.g. temperature<300")
                .required(true),
        )
        .arg(
            Arg::with_name("timeout")
                .long("timeout")
                .takes_value(true)
                .default_value("30")
                .help("Seconds to wait for responses"),
        )
        .get_matches();

    let logger = logging::init("info");

    let dest = Destination::parse(matches.value_of("NODE").unwrap()).expect("Invalid node address");
    let timeout: u64 = matches
        .value_of("timeout")
        .unwrap()
        .parse()
        .expect("Invalid timeout");

    let mut client = Client::connect(&dest, Some(Duration::from_secs(timeout)), &logger)
        .expect("Error connecting to node");

    let mut session = client
        .query(matches.value_of("QUERY").unwrap())
        .expect("Error submitting query");

    println!(
        "query {} fanned out to {} peer(s)",
        session.preamble.query_id,
        session.expected()
    );

    loop {
        match session.next_response() {
            Ok(Some(response)) => {
                for metadata in &response.results {
                    let features: Vec<String> = metadata
                        .features
                        .iter()
                        .map(|feature| format!("{}={}", feature.name, feature.value))
                        .collect();

                    println!("{} [{}]", metadata.name, features.join(", "));
                }
            }
            Ok(None) => break,
            Err(NetworkError::Wait) => {
                eprintln!("timed out waiting for further responses");
                break;
            }
            Err(err) => {
                eprintln!("query failed: {:?}", err);
                std::process::exit(1);
            }
        }
    }
}
