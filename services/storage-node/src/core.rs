use crate::config::NodeConfig;
use galileo::dht::coordinator::Coordinator;
use galileo::dht::network::NetworkInfo;
use galileo::dht::partition::HashPartitioner;
use galileo::dht::tracker::TrackerTable;
use galileo::event::map::EventMap;
use galileo::event::reactor::{ConcurrentReactor, EventQueue, EventReactor};
use galileo::fs::disk::DiskFs;
use galileo::fs::{FileSystem, FsError};
use galileo::net::router::{DualRouter, RouterConfig};
use galileo::net::shared::{Destination, MessageListener, NetworkError};
use orbit::logging;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug)]
pub enum StartError {
    Network(NetworkError),
    Storage(FsError),
}

impl fmt::Display for StartError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StartError::Network(err) => write!(f, "transport startup failed: {:?}", err),
            StartError::Storage(err) => write!(f, "storage startup failed: {}", err),
        }
    }
}

/// A running storage node: dual router, worker pool, coordinator and disk
/// storage wired together.
pub struct StorageNode {
    routers: Arc<DualRouter>,
    pool: ConcurrentReactor<Coordinator<DiskFs, HashPartitioner>>,
    coordinator: Arc<Coordinator<DiskFs, HashPartitioner>>,
    fs: Arc<DiskFs>,
    addr: SocketAddr,
    log: logging::Logger,
}

impl StorageNode {
    pub fn start(
        config: &NodeConfig,
        network: NetworkInfo,
        log: &logging::Logger,
    ) -> Result<StorageNode, StartError> {
        let fs = Arc::new(DiskFs::open(config.storage_root(), log).map_err(StartError::Storage)?);

        let bind: SocketAddr = format!("0.0.0.0:{}", config.server.port)
            .parse()
            .expect("Listen address must parse");

        let router_config = RouterConfig {
            max_write_queue_size: config.server.max_write_queue_size,
        };
        let routers = Arc::new(
            DualRouter::new(&bind, &router_config, log).map_err(StartError::Network)?,
        );
        let addr = routers.local_addr().expect("Server router must be bound");

        let trackers = Arc::new(TrackerTable::new(
            addr.port(),
            Duration::from_secs(config.query.deadline_secs),
            log,
        ));

        let coordinator = Arc::new(Coordinator::new(
            Arc::clone(&routers),
            trackers,
            Arc::new(network),
            HashPartitioner,
            Arc::clone(&fs),
            Destination::new(config.server.host.clone(), addr.port()),
            log,
        ));

        let queue = Arc::new(EventQueue::new());
        routers.add_listener(Arc::clone(&queue) as Arc<dyn MessageListener>);

        let reactor = EventReactor::new(
            Arc::clone(&coordinator),
            EventMap::standard(),
            queue,
            log,
        );
        let pool = ConcurrentReactor::new(reactor, config.server.pool_size, log);
        pool.start();

        let node = StorageNode {
            routers,
            pool,
            coordinator,
            fs,
            addr,
            log: log.new(logging::o!()),
        };

        logging::info!(node.log, "storage node started";
                       "addr" => %node.addr,
                       "pool_size" => config.server.pool_size,
                       "read_only" => node.fs.is_read_only());

        Ok(node)
    }

    #[inline]
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// One housekeeping pass: closes queries past their deadline.
    pub fn sweep(&self) {
        self.coordinator.expire_trackers();
    }

    /// Tears the node down: workers first so no handler races the transport,
    /// then the routers, then storage.
    pub fn shutdown(&self) {
        logging::info!(self.log, "storage node stopping");

        self.pool.shutdown();
        self.routers.shutdown();
        self.fs.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use galileo::client::Client;
    use galileo::dht::data::{Block, Feature, Metadata};
    use orbit::time::timestamp_millis;
    use std::path::PathBuf;

    fn scratch_config(label: &str) -> NodeConfig {
        let root = std::env::temp_dir().join(format!("galileo-node-{}-{}", label, timestamp_millis()));
        drop(std::fs::remove_dir_all(&root));

        let mut config = NodeConfig::default();
        config.server.host = "127.0.0.1".to_string();
        config.server.port = 0;
        config.server.pool_size = 2;
        config.storage.root = Some(root.to_str().unwrap().to_string());
        config
    }

    #[test]
    fn test_node_starts_and_stops() {
        let config = scratch_config("lifecycle");
        let node = StorageNode::start(&config, NetworkInfo::new(Vec::new()), &logging::discard())
            .unwrap();

        assert_ne!(node.local_addr().port(), 0);

        node.sweep();
        node.shutdown();
    }

    #[test]
    fn test_single_node_query_roundtrip() {
        let config = scratch_config("roundtrip");
        let node = StorageNode::start(&config, NetworkInfo::new(Vec::new()), &logging::discard())
            .unwrap();

        // Seed the local index directly: the node never fans out to itself
        node.fs
            .store_block(&Block::new(
                Metadata::new("local", vec![Feature::new("temperature", 250.0)]),
                vec![1],
            ))
            .unwrap();

        let dest = Destination::new("127.0.0.1", node.local_addr().port());
        let mut client = Client::connect(
            &dest,
            Some(Duration::from_secs(5)),
            &logging::discard(),
        )
        .unwrap();

        // An empty overlay yields an empty target set and an immediate close
        let mut session = client.query("temperature<300").unwrap();
        assert_eq!(session.expected(), 0);
        assert!(session.next_response().unwrap().is_none());

        node.shutdown();
    }

    #[test]
    fn test_storage_root_created() {
        let config = scratch_config("root");
        let node = StorageNode::start(&config, NetworkInfo::new(Vec::new()), &logging::discard())
            .unwrap();

        assert!(PathBuf::from(config.storage_root()).is_dir());

        node.shutdown();
    }
}
