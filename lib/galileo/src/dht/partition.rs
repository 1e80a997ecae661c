use crate::dht::data::Metadata;
use crate::dht::network::{NetworkInfo, NodeInfo};
use std::fmt;

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PartitionError {
    pub message: String,
}

impl PartitionError {
    pub fn new<M: Into<String>>(message: M) -> PartitionError {
        PartitionError {
            message: message.into(),
        }
    }
}

impl fmt::Display for PartitionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Strategy deciding which peer owns a block, and which peers a query fans
/// out to. The fan-out target set is a policy seam: the shipped
/// implementation queries the whole overlay.
pub trait Partitioner: Send + Sync {
    fn locate(&self, metadata: &Metadata, network: &NetworkInfo) -> Result<NodeInfo, PartitionError>;

    /// The peers a query is forwarded to.
    fn targets(&self, _query: &str, network: &NetworkInfo) -> Vec<NodeInfo> {
        network.nodes().to_vec()
    }
}

/// Owner selection by FNV-1a hash of the block name over the ordered node
/// list.
pub struct HashPartitioner;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(data: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;

    for byte in data {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }

    hash
}

impl Partitioner for HashPartitioner {
    fn locate(&self, metadata: &Metadata, network: &NetworkInfo) -> Result<NodeInfo, PartitionError> {
        if network.is_empty() {
            return Err(PartitionError::new("no nodes available for placement"));
        }

        let index = (fnv1a(metadata.name.as_bytes()) % network.len() as u64) as usize;
        Ok(network.nodes()[index].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network() -> NetworkInfo {
        NetworkInfo::new(vec![
            NodeInfo::new("alpha", 5555, 0),
            NodeInfo::new("beta", 5555, 0),
            NodeInfo::new("gamma", 5555, 1),
            NodeInfo::new("delta", 5555, 1),
        ])
    }

    fn metadata(name: &str) -> Metadata {
        Metadata::new(name, Vec::new())
    }

    #[test]
    fn test_locate_is_deterministic() {
        let network = network();
        let partitioner = HashPartitioner;

        let first = partitioner.locate(&metadata("sensor-1"), &network).unwrap();
        let second = partitioner.locate(&metadata("sensor-1"), &network).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_locate_spreads_names() {
        let network = network();
        let partitioner = HashPartitioner;

        let mut hosts: Vec<String> = (0..64)
            .map(|index| {
                partitioner
                    .locate(&metadata(&format!("block-{}", index)), &network)
                    .unwrap()
                    .host
            })
            .collect();

        hosts.sort();
        hosts.dedup();

        assert!(hosts.len() > 1);
    }

    #[test]
    fn test_locate_empty_network() {
        let partitioner = HashPartitioner;

        let result = partitioner.locate(&metadata("block"), &NetworkInfo::new(Vec::new()));

        assert!(result.is_err());
    }

    #[test]
    fn test_default_targets_query_whole_overlay() {
        let network = network();
        let partitioner = HashPartitioner;

        let targets = partitioner.targets("temperature<300", &network);

        assert_eq!(targets.len(), network.len());
    }
}
