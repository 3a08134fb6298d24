//! Scripted in-memory server for tests.
//!
//! A [`ScriptBuilder`] assembles the bytes a server would send; a
//! [`MockTransport`] serves them and records what the client writes. The
//! [`MockHandle`] stays with the test after the transport has been moved into
//! a session.

#![allow(clippy::cast_possible_truncation)]

use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::auth::{caching_sha2, plugins};
use crate::protocol::{PacketHeader, PacketWriter, capabilities, charset};
use crate::transport::Transport;
use crate::types::FieldType;

/// Capabilities announced by the scripted server.
pub const MOCK_SERVER_CAPABILITIES: u32 = capabilities::CLIENT_FLAGS
    | capabilities::CLIENT_SSL
    | capabilities::CLIENT_MULTI_RESULTS
    | capabilities::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA
    | capabilities::CLIENT_DEPRECATE_EOF;

/// Connection id announced by the scripted server.
pub const MOCK_CONNECTION_ID: u32 = 42;

/// Version announced by the scripted server.
pub const MOCK_SERVER_VERSION: &str = "8.0.36-mock";

/// Scramble announced by the scripted server (20 bytes).
pub const MOCK_SCRAMBLE: &[u8; 20] = b"abcdefghijklmnopqrst";

/// What happens once the script has been fully read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptEnd {
    /// The peer closes the stream
    Eof,
    /// Every further read times out
    Timeout,
}

#[derive(Debug, Default)]
struct MockState {
    written: Vec<u8>,
    closed: bool,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
}

/// Observer of a [`MockTransport`] that outlives the move into a session.
#[derive(Debug, Clone)]
pub struct MockHandle(Arc<Mutex<MockState>>);

impl MockHandle {
    /// Whether the transport has been shut down.
    pub fn is_closed(&self) -> bool {
        self.0.lock().closed
    }

    /// Raw bytes written by the client.
    pub fn written(&self) -> Vec<u8> {
        self.0.lock().written.clone()
    }

    /// Payloads of every packet written by the client, in order.
    pub fn packets(&self) -> Vec<Vec<u8>> {
        let written = self.written();
        let mut packets = Vec::new();
        let mut pos = 0;
        while pos + PacketHeader::SIZE <= written.len() {
            let mut header = [0u8; PacketHeader::SIZE];
            header.copy_from_slice(&written[pos..pos + PacketHeader::SIZE]);
            let len = PacketHeader::from_bytes(&header).payload_length as usize;
            pos += PacketHeader::SIZE;
            let end = (pos + len).min(written.len());
            packets.push(written[pos..end].to_vec());
            pos = end;
        }
        packets
    }

    /// Text of every `COM_QUERY` written by the client.
    pub fn queries(&self) -> Vec<String> {
        self.packets()
            .into_iter()
            .filter(|p| p.first() == Some(&0x03))
            .map(|p| String::from_utf8_lossy(&p[1..]).into_owned())
            .collect()
    }

    /// Read deadline most recently applied to the transport.
    pub fn read_timeout(&self) -> Option<Duration> {
        self.0.lock().read_timeout
    }

    /// Write deadline most recently applied to the transport.
    pub fn write_timeout(&self) -> Option<Duration> {
        self.0.lock().write_timeout
    }
}

/// In-memory transport replaying a server script.
#[derive(Debug)]
pub struct MockTransport {
    script: Vec<u8>,
    pos: usize,
    max_read: usize,
    end: ScriptEnd,
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new(script: Vec<u8>) -> Self {
        Self {
            script,
            pos: 0,
            max_read: usize::MAX,
            end: ScriptEnd::Eof,
            state: Arc::default(),
        }
    }

    /// Serve at most `n` bytes per read call.
    pub fn with_max_read(mut self, n: usize) -> Self {
        self.max_read = n.max(1);
        self
    }

    /// Choose what reads return once the script is exhausted.
    pub fn with_end(mut self, end: ScriptEnd) -> Self {
        self.end = end;
        self
    }

    pub fn handle(&self) -> MockHandle {
        MockHandle(Arc::clone(&self.state))
    }
}

impl Read for MockTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.state.lock().closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "mock closed"));
        }
        let remaining = &self.script[self.pos..];
        if remaining.is_empty() {
            return match self.end {
                ScriptEnd::Eof => Ok(0),
                ScriptEnd::Timeout => Err(io::Error::new(
                    io::ErrorKind::WouldBlock,
                    "mock read timed out",
                )),
            };
        }
        let n = remaining.len().min(buf.len()).min(self.max_read);
        buf[..n].copy_from_slice(&remaining[..n]);
        self.pos += n;
        Ok(n)
    }
}

impl Write for MockTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "mock closed"));
        }
        state.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for MockTransport {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.state.lock().read_timeout = timeout;
        Ok(())
    }

    fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.state.lock().write_timeout = timeout;
        Ok(())
    }

    fn shutdown(&mut self) -> io::Result<()> {
        self.state.lock().closed = true;
        Ok(())
    }
}

/// Builder for the byte stream a server sends.
///
/// Methods that start a server response (`ok`, `err`, `columns`,
/// `response`) reset the sequence id to 1; the others continue the current
/// exchange. During authentication the builder skips the id of every packet
/// the client is due to send in between.
#[derive(Debug, Default)]
pub struct ScriptBuilder {
    bytes: Vec<u8>,
    sequence_id: u8,
    client_turn: bool,
}

impl ScriptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Greeting, successful `mysql_native_password` login and the OK for the
    /// charset statement.
    pub fn handshake(self) -> Self {
        self.greeting(plugins::MYSQL_NATIVE_PASSWORD)
            .auth_ok()
            .ok()
    }

    /// Protocol v10 greeting announcing `plugin`.
    pub fn greeting(mut self, plugin: &str) -> Self {
        let mut w = PacketWriter::new();
        w.write_u8(10);
        w.write_null_string(MOCK_SERVER_VERSION);
        w.write_u32_le(MOCK_CONNECTION_ID);
        w.write_bytes(&MOCK_SCRAMBLE[..8]);
        w.write_u8(0);
        w.write_u16_le((MOCK_SERVER_CAPABILITIES & 0xFFFF) as u16);
        w.write_u8(charset::UTF8MB4_GENERAL_CI);
        w.write_u16_le(0x0002);
        w.write_u16_le((MOCK_SERVER_CAPABILITIES >> 16) as u16);
        w.write_u8(21);
        w.write_zeros(10);
        w.write_bytes(&MOCK_SCRAMBLE[8..]);
        w.write_u8(0);
        w.write_null_string(plugin);
        self.sequence_id = 0;
        self = self.push(&mut w);
        self.client_turn = true;
        self
    }

    /// OK that terminates the authentication exchange.
    pub fn auth_ok(self) -> Self {
        let mut w = ok_payload(0, 0);
        self.raw(&mut w)
    }

    /// Auth switch request to `plugin` with a fresh scramble.
    pub fn auth_switch(self, plugin: &str) -> Self {
        let mut w = PacketWriter::new();
        w.write_u8(0xFE);
        w.write_null_string(plugin);
        w.write_bytes(MOCK_SCRAMBLE);
        w.write_u8(0);
        let mut this = self.raw(&mut w);
        this.client_turn = true;
        this
    }

    /// `caching_sha2_password` status byte (fast auth success or full auth).
    pub fn auth_more_data(self, status: u8) -> Self {
        let mut w = PacketWriter::new();
        w.write_u8(0x01);
        w.write_u8(status);
        let mut this = self.raw(&mut w);
        this.client_turn = status == caching_sha2::PERFORM_FULL_AUTH;
        this
    }

    /// Raw payload continuing the current exchange.
    pub fn packet(self, payload: &[u8]) -> Self {
        let mut w = PacketWriter::new();
        w.write_bytes(payload);
        self.raw(&mut w)
    }

    /// Raw payload starting a server response.
    pub fn response(mut self, payload: &[u8]) -> Self {
        self.start_response();
        let mut w = PacketWriter::new();
        w.write_bytes(payload);
        self.push(&mut w)
    }

    /// OK response with no affected rows.
    pub fn ok(self) -> Self {
        self.ok_with(0, 0)
    }

    /// OK response reporting affected rows and the last insert id.
    pub fn ok_with(mut self, affected_rows: u64, last_insert_id: u64) -> Self {
        self.start_response();
        let mut w = ok_payload(affected_rows, last_insert_id);
        self.push(&mut w)
    }

    /// ERR response.
    pub fn err(mut self, code: u16, sql_state: &str, message: &str) -> Self {
        self.start_response();
        let mut w = err_payload(code, sql_state, message);
        self.push(&mut w)
    }

    /// ERR packet continuing the current response (e.g. mid result set).
    pub fn err_in_stream(self, code: u16, sql_state: &str, message: &str) -> Self {
        let mut w = err_payload(code, sql_state, message);
        self.raw(&mut w)
    }

    /// Result set head: column count, one definition per name and the EOF
    /// closing the metadata.
    pub fn columns(mut self, names: &[&str]) -> Self {
        self.start_response();
        let mut w = PacketWriter::new();
        w.write_lenenc_int(names.len() as u64);
        self = self.raw(&mut w);
        for name in names {
            let mut w = column_payload(name);
            self = self.raw(&mut w);
        }
        self.eof()
    }

    /// Text-protocol row of raw values; `None` encodes NULL.
    pub fn binary_row(self, values: &[Option<&[u8]>]) -> Self {
        let mut w = PacketWriter::new();
        for value in values {
            match value {
                Some(v) => w.write_lenenc_bytes(v),
                None => w.write_u8(0xFB),
            }
        }
        self.raw(&mut w)
    }

    /// Text-protocol row; `None` encodes NULL.
    pub fn row(self, values: &[Option<&str>]) -> Self {
        let values: Vec<Option<&[u8]>> = values.iter().map(|v| v.map(str::as_bytes)).collect();
        self.binary_row(&values)
    }

    /// Text-protocol row of non-NULL values.
    pub fn text_row(self, values: &[&str]) -> Self {
        let values: Vec<Option<&[u8]>> = values.iter().map(|v| Some(v.as_bytes())).collect();
        self.binary_row(&values)
    }

    /// EOF packet.
    pub fn eof(self) -> Self {
        let mut w = PacketWriter::new();
        w.write_u8(0xFE);
        w.write_u16_le(0);
        w.write_u16_le(0x0002);
        self.raw(&mut w)
    }

    pub fn build(self) -> Vec<u8> {
        self.bytes
    }

    /// Finish the script into a transport.
    pub fn transport(self) -> MockTransport {
        MockTransport::new(self.build())
    }

    fn start_response(&mut self) {
        self.sequence_id = 1;
        self.client_turn = false;
    }

    fn raw(mut self, w: &mut PacketWriter) -> Self {
        if self.client_turn {
            self.sequence_id = self.sequence_id.wrapping_add(1);
            self.client_turn = false;
        }
        self.push(w)
    }

    fn push(mut self, w: &mut PacketWriter) -> Self {
        let (bytes, next) = w.finish(self.sequence_id);
        self.bytes.extend_from_slice(bytes);
        self.sequence_id = next;
        self
    }
}

fn ok_payload(affected_rows: u64, last_insert_id: u64) -> PacketWriter {
    let mut w = PacketWriter::new();
    w.write_u8(0x00);
    w.write_lenenc_int(affected_rows);
    w.write_lenenc_int(last_insert_id);
    w.write_u16_le(0x0002);
    w.write_u16_le(0);
    w
}

fn err_payload(code: u16, sql_state: &str, message: &str) -> PacketWriter {
    let mut w = PacketWriter::new();
    w.write_u8(0xFF);
    w.write_u16_le(code);
    w.write_u8(b'#');
    w.write_bytes(sql_state.as_bytes());
    w.write_bytes(message.as_bytes());
    w
}

fn column_payload(name: &str) -> PacketWriter {
    let mut w = PacketWriter::new();
    w.write_lenenc_string("def");
    w.write_lenenc_string("test");
    w.write_lenenc_string("t");
    w.write_lenenc_string("t");
    w.write_lenenc_string(name);
    w.write_lenenc_string(name);
    w.write_lenenc_int(0x0c);
    w.write_u16_le(u16::from(charset::UTF8MB4_GENERAL_CI));
    w.write_u32_le(255);
    w.write_u8(FieldType::VarString.code());
    w.write_u16_le(0);
    w.write_u8(0);
    w.write_zeros(2);
    w
}
