use clap::{App, Arg};
use galileo::client::Client;
use galileo::dht::data::{Block, Feature, Metadata};
use galileo::net::shared::Destination;
use orbit::logging;
use std::fs;
use std::path::Path;

fn parse_feature(raw: &str) -> Feature {
    let split = raw.find('=').expect("Features must be name=value");
    let name = &raw[..split];
    let value: f64 = raw[split + 1..]
        .parse()
        .expect("Feature values must be numeric");

    Feature::new(name, value)
}

pub fn main() {
    let matches = App::new("Galileo Block Loader")
        .version("1.0")
        .author("Galileo Project")
        .about("Stores a file as a block with feature metadata.")
        .arg(
            Arg::with_name("NODE")
                .help("Node address as host:port")
                .required(true),
        )
        .arg(
            Arg::with_name("FILE")
                .help("Path to the payload file")
                .required(true),
        )
        .arg(
            Arg::with_name("name")
                .long("name")
                .takes_value(true)
                .help("Block name (defaults to the file name)"),
        )
        .arg(
            Arg::with_name("feature")
                .long("feature")
                .short("f")
                .takes_value(true)
                .multiple(true)
                .help("Feature attached to the block, as name=value"),
        )
        .get_matches();

    let logger = logging::init("info");

    let dest = Destination::parse(matches.value_of("NODE").unwrap()).expect("Invalid node address");
    let path = matches.value_of("FILE").unwrap();

    let data = fs::read(path).expect("Error reading payload file");
    let name = match matches.value_of("name") {
        Some(name) => name.to_string(),
        None => Path::new(path)
            .file_name()
            .expect("Payload path must name a file")
            .to_string_lossy()
            .into_owned(),
    };

    let features: Vec<Feature> = matches
        .values_of("feature")
        .map(|values| values.map(parse_feature).collect())
        .unwrap_or_default();

    let block = Block::new(Metadata::new(name, features), data);

    let mut client = Client::connect(&dest, None, &logger).expect("Error connecting to node");
    client.store(block).expect("Error submitting block");

    logging::info!(logger, "block submitted"; "dest" => %dest);
}
