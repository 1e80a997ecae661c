use crate::net::buffer::Buffer;
use crate::net::shared::{ErrorType, NetworkError, NetworkResult};
use byteorder::{BigEndian, ByteOrder, WriteBytesExt};

/// Bytes occupied by the length prefix.
pub const PREFIX_SIZE: usize = 4;

/// Upper bound on a single framed payload.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Prepends the 4-byte big-endian length prefix to the payload. The prefix is
/// written exactly once, at enqueue time.
pub fn encode(payload: &[u8]) -> NetworkResult<Vec<u8>> {
    if payload.is_empty() {
        return Err(NetworkError::Fatal(ErrorType::EmptyPayload));
    }

    if payload.len() > MAX_FRAME_SIZE {
        return Err(NetworkError::Fatal(ErrorType::PayloadTooLarge));
    }

    let mut frame = Vec::with_capacity(PREFIX_SIZE + payload.len());
    frame
        .write_u32::<BigEndian>(payload.len() as u32)
        .expect("Vec write is infallible");
    frame.extend_from_slice(payload);

    Ok(frame)
}

/// Extracts one whole payload from the assembly buffer, or `None` when the
/// buffer does not yet hold a complete frame. Never yields a short or merged
/// payload.
pub fn extract(buffer: &mut Buffer) -> NetworkResult<Option<Vec<u8>>> {
    let data = buffer.read_slice();

    if data.len() < PREFIX_SIZE {
        return Ok(None);
    }

    let declared = BigEndian::read_u32(&data[..PREFIX_SIZE]) as usize;

    if declared == 0 {
        return Err(NetworkError::Fatal(ErrorType::EmptyPayload));
    }

    if declared > MAX_FRAME_SIZE {
        return Err(NetworkError::Fatal(ErrorType::PayloadTooLarge));
    }

    if data.len() < PREFIX_SIZE + declared {
        return Ok(None);
    }

    let payload = data[PREFIX_SIZE..PREFIX_SIZE + declared].to_vec();
    buffer.consume(PREFIX_SIZE + declared);

    Ok(Some(payload))
}
