use crate::net::shared::{Destination, NetworkResult};
use crate::serial;
use crate::serial::{Deserialize, Serialize, SizedRead, SizedWrite};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde_derive::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};
use std::fs::File;
use std::io;
use std::path::Path;

/// One storage node in the overlay.
#[derive(Debug, Clone, Eq, PartialEq, SerdeSerialize, SerdeDeserialize)]
pub struct NodeInfo {
    pub host: String,
    pub port: u16,
    pub group: u32,
}

impl NodeInfo {
    pub fn new<H: Into<String>>(host: H, port: u16, group: u32) -> NodeInfo {
        NodeInfo {
            host: host.into(),
            port,
            group,
        }
    }

    #[inline]
    pub fn destination(&self) -> Destination {
        Destination::new(self.host.clone(), self.port)
    }
}

impl Serialize for NodeInfo {
    fn serialize<W: SizedWrite>(&self, stream: &mut W) -> NetworkResult<()> {
        serial::write_string(stream, &self.host)?;
        stream.write_u16::<BigEndian>(self.port)?;
        stream.write_u32::<BigEndian>(self.group)?;
        Ok(())
    }
}

impl Deserialize for NodeInfo {
    fn deserialize<R: SizedRead>(stream: &mut R) -> NetworkResult<NodeInfo> {
        Ok(NodeInfo {
            host: serial::read_string(stream)?,
            port: stream.read_u16::<BigEndian>()?,
            group: stream.read_u32::<BigEndian>()?,
        })
    }
}

/// Static snapshot of the overlay read at startup. Immutable for the node's
/// lifetime.
#[derive(Debug, Clone)]
pub struct NetworkInfo {
    nodes: Vec<NodeInfo>,
}

impl NetworkInfo {
    pub fn new(nodes: Vec<NodeInfo>) -> NetworkInfo {
        NetworkInfo { nodes }
    }

    /// Loads the overlay description from a JSON array of
    /// `{host, port, group}` records.
    pub fn load<P: AsRef<Path>>(path: P) -> io::Result<NetworkInfo> {
        let file = File::open(path)?;
        let nodes: Vec<NodeInfo> = serde_json::from_reader(file)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

        Ok(NetworkInfo { nodes })
    }

    #[inline]
    pub fn nodes(&self) -> &[NodeInfo] {
        &self.nodes
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All nodes except the one listening at the supplied destination.
    pub fn excluding(&self, dest: &Destination) -> Vec<NodeInfo> {
        self.nodes
            .iter()
            .filter(|node| &node.destination() != dest)
            .cloned()
            .collect()
    }
}
