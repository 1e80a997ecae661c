pub use crate::client::Client;
pub use crate::dht::coordinator::Coordinator;
pub use crate::dht::data::{Block, Feature, Metadata};
pub use crate::dht::network::{NetworkInfo, NodeInfo};
pub use crate::dht::partition::{HashPartitioner, Partitioner};
pub use crate::dht::tracker::TrackerTable;
pub use crate::event::container::EventKind;
pub use crate::event::map::EventMap;
pub use crate::event::reactor::{ConcurrentReactor, EventQueue, EventReactor};
pub use crate::fs::disk::DiskFs;
pub use crate::fs::FileSystem;
pub use crate::net::router::{DualRouter, Router, RouterConfig};
pub use crate::net::shared::{ConnectionId, Destination, MessageListener, RouterMessage};
