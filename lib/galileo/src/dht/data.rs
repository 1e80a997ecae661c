use crate::net::shared::NetworkResult;
use crate::serial;
use crate::serial::{Deserialize, Serialize, SizedRead, SizedWrite};

/// A named scalar attribute attached to a block and indexed for query.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub name: String,
    pub value: f64,
}

impl Feature {
    #[inline]
    pub fn new<N: Into<String>>(name: N, value: f64) -> Feature {
        Feature {
            name: name.into(),
            value,
        }
    }
}

impl Serialize for Feature {
    fn serialize<W: SizedWrite>(&self, stream: &mut W) -> NetworkResult<()> {
        serial::write_string(stream, &self.name)?;
        serial::write_f64(stream, self.value)
    }
}

impl Deserialize for Feature {
    fn deserialize<R: SizedRead>(stream: &mut R) -> NetworkResult<Feature> {
        Ok(Feature {
            name: serial::read_string(stream)?,
            value: serial::read_f64(stream)?,
        })
    }
}

/// Feature metadata describing one block.
#[derive(Debug, Clone, PartialEq)]
pub struct Metadata {
    pub name: String,
    pub features: Vec<Feature>,
}

impl Metadata {
    pub fn new<N: Into<String>>(name: N, features: Vec<Feature>) -> Metadata {
        Metadata {
            name: name.into(),
            features,
        }
    }

    /// Looks up a feature value by name.
    pub fn feature(&self, name: &str) -> Option<f64> {
        self.features
            .iter()
            .find(|feature| feature.name == name)
            .map(|feature| feature.value)
    }
}

impl Serialize for Metadata {
    fn serialize<W: SizedWrite>(&self, stream: &mut W) -> NetworkResult<()> {
        serial::write_string(stream, &self.name)?;
        serial::write_list(stream, &self.features)
    }
}

impl Deserialize for Metadata {
    fn deserialize<R: SizedRead>(stream: &mut R) -> NetworkResult<Metadata> {
        Ok(Metadata {
            name: serial::read_string(stream)?,
            features: serial::read_list(stream)?,
        })
    }
}

/// A unit of stored data plus its metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub metadata: Metadata,
    pub data: Vec<u8>,
}

impl Block {
    pub fn new(metadata: Metadata, data: Vec<u8>) -> Block {
        Block { metadata, data }
    }
}

impl Serialize for Block {
    fn serialize<W: SizedWrite>(&self, stream: &mut W) -> NetworkResult<()> {
        self.metadata.serialize(stream)?;
        serial::write_bytes(stream, &self.data)
    }
}

impl Deserialize for Block {
    fn deserialize<R: SizedRead>(stream: &mut R) -> NetworkResult<Block> {
        Ok(Block {
            metadata: Metadata::deserialize(stream)?,
            data: serial::read_bytes(stream)?,
        })
    }
}
