use crate::net::shared::NetworkResult;
use crate::serial;
use crate::serial::{Deserialize, Serialize, SizedRead, SizedWrite};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

/// Closed enumeration of application event types. Tag values are stable
/// across the cluster.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum EventKind {
    Storage = 1,
    StorageRequest = 2,
    Query = 3,
    QueryRequest = 4,
    QueryResponse = 5,
    QueryPreamble = 6,
}

impl EventKind {
    #[inline]
    pub fn tag(self) -> i32 {
        self as i32
    }

    pub fn from_tag(tag: i32) -> Option<EventKind> {
        match tag {
            1 => Some(EventKind::Storage),
            2 => Some(EventKind::StorageRequest),
            3 => Some(EventKind::Query),
            4 => Some(EventKind::QueryRequest),
            5 => Some(EventKind::QueryResponse),
            6 => Some(EventKind::QueryPreamble),
            _ => None,
        }
    }
}

/// The unit of the application protocol: a type tag and an opaque body. The
/// transport and the reactor never look inside the body.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct EventContainer {
    pub tag: i32,
    pub body: Vec<u8>,
}

impl EventContainer {
    /// Serializes a typed payload and wraps it in a container of the given
    /// kind, returning the container's wire bytes.
    pub fn wrap<S: Serialize>(kind: EventKind, payload: &S) -> NetworkResult<Vec<u8>> {
        let container = EventContainer {
            tag: kind.tag(),
            body: serial::to_bytes(payload)?,
        };

        serial::to_bytes(&container)
    }
}

impl Serialize for EventContainer {
    fn serialize<W: SizedWrite>(&self, stream: &mut W) -> NetworkResult<()> {
        stream.write_i32::<BigEndian>(self.tag)?;
        serial::write_bytes(stream, &self.body)
    }
}

impl Deserialize for EventContainer {
    fn deserialize<R: SizedRead>(stream: &mut R) -> NetworkResult<EventContainer> {
        Ok(EventContainer {
            tag: stream.read_i32::<BigEndian>()?,
            body: serial::read_bytes(stream)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::shared::{ErrorType, NetworkError};

    #[test]
    fn test_tag_values_are_stable() {
        assert_eq!(EventKind::Storage.tag(), 1);
        assert_eq!(EventKind::StorageRequest.tag(), 2);
        assert_eq!(EventKind::Query.tag(), 3);
        assert_eq!(EventKind::QueryRequest.tag(), 4);
        assert_eq!(EventKind::QueryResponse.tag(), 5);
        assert_eq!(EventKind::QueryPreamble.tag(), 6);
    }

    #[test]
    fn test_from_tag_closed_set() {
        for tag in 1..=6 {
            let kind = EventKind::from_tag(tag).unwrap();
            assert_eq!(kind.tag(), tag);
        }

        assert_eq!(EventKind::from_tag(0), None);
        assert_eq!(EventKind::from_tag(7), None);
        assert_eq!(EventKind::from_tag(-1), None);
    }

    #[test]
    fn test_container_roundtrip() {
        let container = EventContainer {
            tag: 5,
            body: vec![1, 2, 3, 4],
        };

        let data = serial::to_bytes(&container).unwrap();
        let decoded: EventContainer = serial::from_bytes(&data).unwrap();

        assert_eq!(decoded, container);
    }

    #[test]
    fn test_container_err_truncated_body() {
        // Declares a 100-byte body but carries only 2
        let data = [0, 0, 0, 3, 0, 0, 0, 100, 9, 9];
        let result: NetworkResult<EventContainer> = serial::from_bytes(&data);

        assert_eq!(
            result.unwrap_err(),
            NetworkError::Fatal(ErrorType::Serialization)
        );
    }
}
