//! MySQL packet writing utilities.

#![allow(clippy::cast_possible_truncation)]

use crate::protocol::{MAX_PACKET_SIZE, PacketHeader};

/// A writer for MySQL protocol data.
///
/// The writer reserves room for the 4-byte packet header up front, so a
/// payload can be framed in place without copying it into a new buffer.
#[derive(Debug)]
pub struct PacketWriter {
    buffer: Vec<u8>,
}

impl Default for PacketWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketWriter {
    /// Create a new writer with default capacity.
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    /// Create a new writer with specified payload capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut buffer = Vec::with_capacity(capacity + PacketHeader::SIZE);
        buffer.extend_from_slice(&[0; PacketHeader::SIZE]);
        Self { buffer }
    }

    /// Length of the payload written so far.
    pub fn len(&self) -> usize {
        self.buffer.len() - PacketHeader::SIZE
    }

    /// Check if no payload has been written.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Discard the payload, keeping the allocation.
    pub fn clear(&mut self) {
        self.buffer.truncate(PacketHeader::SIZE);
    }

    /// Get the payload as a byte slice.
    pub fn payload(&self) -> &[u8] {
        &self.buffer[PacketHeader::SIZE..]
    }

    /// Write a single byte.
    pub fn write_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    /// Write a u16 (little-endian).
    pub fn write_u16_le(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Write a u24 (little-endian, 3 bytes).
    pub fn write_u24_le(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes()[..3]);
    }

    /// Write a u32 (little-endian).
    pub fn write_u32_le(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Write a u64 (little-endian).
    pub fn write_u64_le(&mut self, value: u64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Write a length-encoded integer.
    pub fn write_lenenc_int(&mut self, value: u64) {
        if value < 251 {
            self.write_u8(value as u8);
        } else if value < 0x10000 {
            self.write_u8(0xFC);
            self.write_u16_le(value as u16);
        } else if value < 0x0100_0000 {
            self.write_u8(0xFD);
            self.write_u24_le(value as u32);
        } else {
            self.write_u8(0xFE);
            self.write_u64_le(value);
        }
    }

    /// Write a length-encoded string.
    pub fn write_lenenc_string(&mut self, s: &str) {
        self.write_lenenc_bytes(s.as_bytes());
    }

    /// Write a length-encoded byte slice.
    pub fn write_lenenc_bytes(&mut self, data: &[u8]) {
        self.write_lenenc_int(data.len() as u64);
        self.buffer.extend_from_slice(data);
    }

    /// Write a null-terminated string.
    pub fn write_null_string(&mut self, s: &str) {
        self.buffer.extend_from_slice(s.as_bytes());
        self.buffer.push(0);
    }

    /// Write raw bytes.
    pub fn write_bytes(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Write zeros (padding).
    pub fn write_zeros(&mut self, count: usize) {
        self.buffer.resize(self.buffer.len() + count, 0);
    }

    /// Frame the payload and return the bytes ready to be written.
    ///
    /// Payloads that fit into a single packet are framed in place. Larger
    /// payloads are split into `MAX_PACKET_SIZE` chunks, followed by an empty
    /// packet when the last chunk is exactly `MAX_PACKET_SIZE` long. Returns
    /// the sequence id to use for the next packet.
    pub fn finish(&mut self, sequence_id: u8) -> (&[u8], u8) {
        let len = self.len();
        if len < MAX_PACKET_SIZE {
            let header = PacketHeader {
                payload_length: len as u32,
                sequence_id,
            };
            self.buffer[..PacketHeader::SIZE].copy_from_slice(&header.to_bytes());
            return (&self.buffer, sequence_id.wrapping_add(1));
        }

        let payload = self.buffer.split_off(PacketHeader::SIZE);
        self.buffer.clear();
        let mut sequence_id = sequence_id;
        let mut chunks = payload.chunks(MAX_PACKET_SIZE).peekable();
        while let Some(chunk) = chunks.next() {
            let header = PacketHeader {
                payload_length: chunk.len() as u32,
                sequence_id,
            };
            self.buffer.extend_from_slice(&header.to_bytes());
            self.buffer.extend_from_slice(chunk);
            sequence_id = sequence_id.wrapping_add(1);
            if chunks.peek().is_none() && chunk.len() == MAX_PACKET_SIZE {
                let header = PacketHeader {
                    payload_length: 0,
                    sequence_id,
                };
                self.buffer.extend_from_slice(&header.to_bytes());
                sequence_id = sequence_id.wrapping_add(1);
            }
        }
        (&self.buffer, sequence_id)
    }
}
