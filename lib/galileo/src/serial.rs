//! Self-describing serialization of primitive values. All multi-byte integers
//! are big-endian; strings and byte arrays carry an `i32` length prefix,
//! sequences an `i32` element count.

use crate::net::shared::{ErrorType, NetworkError, NetworkResult};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io;

/// Longest wire form of a varint-encoded `u64`.
pub const MAX_VARINT_LEN: usize = 10;

/// Augmented `io::Write` that is aware of the amount of remaining free capacity
/// in the destination.
pub trait SizedWrite: io::Write {
    /// Remaining free capacity in the destination.
    fn free_capacity(&self) -> usize;
}

/// Augmented `io::Read` that is aware of the amount of remaining data in the
/// source.
pub trait SizedRead: io::Read {
    /// Remaining data in the source.
    fn remaining_data(&self) -> usize;
}

impl SizedWrite for io::Cursor<&mut [u8]> {
    #[inline]
    fn free_capacity(&self) -> usize {
        self.get_ref().len() - self.position() as usize
    }
}

impl SizedWrite for io::Cursor<&mut Vec<u8>> {
    #[inline]
    fn free_capacity(&self) -> usize {
        usize::max_value() - self.position() as usize
    }
}

impl SizedRead for io::Cursor<&[u8]> {
    #[inline]
    fn remaining_data(&self) -> usize {
        self.get_ref().len() - self.position() as usize
    }
}

/// Trait for manually serialized objects. Implementors must validate the
/// remaining free capacity in the stream upfront and only write into it if all
/// the content they wish to write fits.
///
/// Should return `NetworkError::Wait` in case there is not enough capacity in
/// the stream.
pub trait Serialize {
    fn serialize<W: SizedWrite>(&self, stream: &mut W) -> NetworkResult<()>;
}

/// Trait for manually deserialized objects.
pub trait Deserialize: Sized {
    fn deserialize<R: SizedRead>(stream: &mut R) -> NetworkResult<Self>;
}

/// Serializes the value into a fresh byte vector.
#[inline]
pub fn to_bytes<S: Serialize>(value: &S) -> NetworkResult<Vec<u8>> {
    let mut data = Vec::new();
    let mut stream = io::Cursor::new(&mut data);
    value.serialize(&mut stream)?;
    Ok(data)
}

/// Deserializes a value from the supplied byte slice.
#[inline]
pub fn from_bytes<D: Deserialize>(data: &[u8]) -> NetworkResult<D> {
    let mut stream = io::Cursor::new(data);
    D::deserialize(&mut stream)
}

#[inline]
pub fn write_string<W: SizedWrite>(stream: &mut W, value: &str) -> NetworkResult<()> {
    write_bytes(stream, value.as_bytes())
}

#[inline]
pub fn read_string<R: SizedRead>(stream: &mut R) -> NetworkResult<String> {
    let data = read_bytes(stream)?;
    String::from_utf8(data).map_err(|_| NetworkError::Fatal(ErrorType::Serialization))
}

#[inline]
pub fn write_bytes<W: SizedWrite>(stream: &mut W, value: &[u8]) -> NetworkResult<()> {
    if value.len() > i32::max_value() as usize {
        return Err(NetworkError::Fatal(ErrorType::Serialization));
    }

    if stream.free_capacity() < 4 + value.len() {
        return Err(NetworkError::Wait);
    }

    stream.write_i32::<BigEndian>(value.len() as i32)?;
    stream.write_all(value)?;
    Ok(())
}

#[inline]
pub fn read_bytes<R: SizedRead>(stream: &mut R) -> NetworkResult<Vec<u8>> {
    let length = stream.read_i32::<BigEndian>()?;

    if length < 0 || length as usize > stream.remaining_data() {
        return Err(NetworkError::Fatal(ErrorType::Serialization));
    }

    let mut data = vec![0u8; length as usize];
    stream.read_exact(&mut data)?;
    Ok(data)
}

/// Writes an unsigned varint, seven bits per byte, least significant group
/// first, high bit set on all but the last byte.
#[inline]
pub fn write_varint<W: SizedWrite>(stream: &mut W, value: u64) -> NetworkResult<()> {
    if stream.free_capacity() < MAX_VARINT_LEN {
        return Err(NetworkError::Wait);
    }

    let mut remainder = value;
    while remainder >= 0x80 {
        stream.write_u8((remainder as u8) | 0x80)?;
        remainder >>= 7;
    }
    stream.write_u8(remainder as u8)?;
    Ok(())
}

#[inline]
pub fn read_varint<R: SizedRead>(stream: &mut R) -> NetworkResult<u64> {
    let mut value = 0u64;

    for index in 0..MAX_VARINT_LEN {
        let byte = stream.read_u8()?;
        value |= u64::from(byte & 0x7f) << (index * 7);

        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }

    Err(NetworkError::Fatal(ErrorType::Serialization))
}

#[inline]
pub fn write_list<W: SizedWrite, S: Serialize>(stream: &mut W, values: &[S]) -> NetworkResult<()> {
    if values.len() > i32::max_value() as usize {
        return Err(NetworkError::Fatal(ErrorType::Serialization));
    }

    if stream.free_capacity() < 4 {
        return Err(NetworkError::Wait);
    }

    stream.write_i32::<BigEndian>(values.len() as i32)?;
    for value in values {
        value.serialize(stream)?;
    }
    Ok(())
}

#[inline]
pub fn read_list<R: SizedRead, D: Deserialize>(stream: &mut R) -> NetworkResult<Vec<D>> {
    let count = stream.read_i32::<BigEndian>()?;

    // A sequence has at least one byte per element on the wire
    if count < 0 || count as usize > stream.remaining_data() {
        return Err(NetworkError::Fatal(ErrorType::Serialization));
    }

    let mut values = Vec::with_capacity(count as usize);
    for _ in 0..count {
        values.push(D::deserialize(stream)?);
    }
    Ok(values)
}

#[inline]
pub fn write_f64<W: SizedWrite>(stream: &mut W, value: f64) -> NetworkResult<()> {
    if stream.free_capacity() < 8 {
        return Err(NetworkError::Wait);
    }

    stream.write_u64::<BigEndian>(value.to_bits())?;
    Ok(())
}

#[inline]
pub fn read_f64<R: SizedRead>(stream: &mut R) -> NetworkResult<f64> {
    Ok(f64::from_bits(stream.read_u64::<BigEndian>()?))
}
