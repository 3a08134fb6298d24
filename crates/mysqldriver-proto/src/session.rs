//! A protocol session: handshake, commands and result set streaming.
//!
//! The session owns one reusable payload buffer. Every packet read replaces
//! its contents, so a slice obtained from [`Session::payload`] is only valid
//! until the next read. Session methods never decide whether a connection is
//! still usable; callers inspect the returned error for that.

// MySQL protocol uses well-defined packet sizes that fit in u32 (max 16MB)
#![allow(clippy::cast_possible_truncation)]

use std::time::Duration;

use crate::auth::{self, caching_sha2, plugins};
use crate::error::{Error, ProtocolError, Result, auth_error, protocol_error};
use crate::protocol::{
    Command, MAX_PACKET_SIZE, OkPacket, PacketReader, PacketType, PacketWriter, capabilities,
    charset,
};
use crate::transport::{CancelToken, PacketStream, Stats, Transport};
use crate::types::{ColumnDef, FieldType};

/// Credentials and schema sent in the handshake response.
#[derive(Debug, Clone, Copy, Default)]
pub struct HandshakeParams<'a> {
    pub user: &'a str,
    pub password: &'a str,
    /// Default schema; empty for none
    pub database: &'a str,
}

/// Server facts learned during the handshake.
#[derive(Debug, Clone, Default)]
pub struct ServerInfo {
    /// Server version string
    pub server_version: String,
    /// Connection (thread) id
    pub connection_id: u32,
    /// Flags announced by the server
    pub capabilities: u32,
    /// Status flags of the greeting
    pub status_flags: u16,
}

/// Response head of a `COM_QUERY`.
#[derive(Debug)]
pub enum QueryResponse {
    /// The statement produced no result set
    Ok(OkPacket),
    /// Column metadata of a result set; rows follow
    ResultSet(Vec<ColumnDef>),
}

/// Protocol state of a single server connection.
#[derive(Debug)]
pub struct Session {
    stream: PacketStream,
    payload: Vec<u8>,
    writer: PacketWriter,
    capabilities: u32,
    server: ServerInfo,
}

impl Session {
    /// Wrap a connected transport. No bytes are exchanged until
    /// [`Session::handshake`].
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            stream: PacketStream::new(transport),
            payload: Vec::with_capacity(1024),
            writer: PacketWriter::new(),
            capabilities: 0,
            server: ServerInfo::default(),
        }
    }

    /// Negotiated capability flags.
    pub fn capabilities(&self) -> u32 {
        self.capabilities
    }

    pub fn server_info(&self) -> &ServerInfo {
        &self.server
    }

    pub fn stats(&self) -> Stats {
        self.stream.stats()
    }

    pub fn reset_stats(&mut self) {
        self.stream.reset_stats();
    }

    pub fn set_cancel_token(&mut self, token: Option<CancelToken>) {
        self.stream.set_cancel_token(token);
    }

    pub fn set_timeouts(&mut self, read: Option<Duration>, write: Option<Duration>) -> Result<()> {
        self.stream.set_timeouts(read, write)
    }

    /// Payload of the most recently read packet.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Read the next packet into the payload buffer.
    pub fn read_packet(&mut self) -> Result<()> {
        self.stream.read_packet(&mut self.payload)
    }

    /// Perform the connection phase: greeting, handshake response and the
    /// authentication exchange.
    pub fn handshake(&mut self, params: &HandshakeParams<'_>) -> Result<()> {
        self.read_packet()?;
        if self.payload.first() == Some(&0xFF) {
            return Err(self.server_error());
        }
        let greeting = parse_greeting(&self.payload)?;
        tracing::debug!(
            server_version = %greeting.info.server_version,
            connection_id = greeting.info.connection_id,
            auth_plugin = %greeting.auth_plugin,
            "Received server greeting"
        );

        let mut client_caps = capabilities::CLIENT_FLAGS & greeting.info.capabilities;
        if params.database.is_empty() {
            client_caps &= !capabilities::CLIENT_CONNECT_WITH_DB;
        }
        self.capabilities = client_caps;
        self.server = greeting.info;

        let auth_response =
            auth::scramble(&greeting.auth_plugin, params.password, &greeting.auth_data);
        self.send_handshake_response(params, &greeting.auth_plugin, &auth_response)?;
        self.authenticate(params.password, greeting.auth_plugin, greeting.auth_data)
    }

    fn send_handshake_response(
        &mut self,
        params: &HandshakeParams<'_>,
        plugin: &str,
        auth_response: &[u8],
    ) -> Result<()> {
        let caps = self.capabilities;
        let w = &mut self.writer;
        w.clear();
        w.write_u32_le(caps);
        w.write_u32_le(MAX_PACKET_SIZE as u32);
        w.write_u8(charset::DEFAULT_COLLATION);
        w.write_zeros(23);
        w.write_null_string(params.user);

        if caps & capabilities::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA != 0 {
            w.write_lenenc_bytes(auth_response);
        } else if caps & capabilities::CLIENT_SECURE_CONNECTION != 0 {
            // Auth responses are always < 256 bytes (SHA1=20, SHA256=32)
            w.write_u8(auth_response.len() as u8);
            w.write_bytes(auth_response);
        } else {
            w.write_bytes(auth_response);
            w.write_u8(0);
        }

        if caps & capabilities::CLIENT_CONNECT_WITH_DB != 0 {
            w.write_null_string(params.database);
        }
        if caps & capabilities::CLIENT_PLUGIN_AUTH != 0 {
            w.write_null_string(plugin);
        }
        self.stream.write_packet(&mut self.writer)
    }

    /// Drive the authentication exchange until the server accepts or rejects
    /// the credentials.
    fn authenticate(&mut self, password: &str, mut plugin: String, mut seed: Vec<u8>) -> Result<()> {
        loop {
            self.read_packet()?;
            let Some(&first) = self.payload.first() else {
                return Err(protocol_error("Empty authentication response"));
            };

            match first {
                0x00 => {
                    tracing::debug!(plugin = %plugin, "Authentication succeeded");
                    return Ok(());
                }
                0xFF => {
                    let err = PacketReader::new(&self.payload)
                        .parse_err_packet()
                        .ok_or_else(|| protocol_error("Invalid error packet"))?;
                    return Err(auth_error(format!(
                        "Authentication failed: {} ({})",
                        err.message, err.code
                    )));
                }
                0xFE => {
                    let mut reader = PacketReader::new(&self.payload[1..]);
                    plugin = reader
                        .read_null_string()
                        .ok_or_else(|| protocol_error("Missing plugin name in auth switch"))?;
                    seed = trim_nul(reader.read_rest()).to_vec();
                    tracing::debug!(plugin = %plugin, "Server requested auth switch");
                    let response = auth::scramble(&plugin, password, &seed);
                    self.write_raw(&response)?;
                }
                caching_sha2::MORE_DATA if plugin == plugins::CACHING_SHA2_PASSWORD => {
                    match self.payload.get(1).copied() {
                        Some(caching_sha2::FAST_AUTH_SUCCESS) => {}
                        Some(caching_sha2::PERFORM_FULL_AUTH) => {
                            self.full_auth(password, &seed)?;
                        }
                        _ => {
                            return Err(protocol_error(format!(
                                "Unknown caching_sha2_password response: {:02X?}",
                                self.payload
                            )));
                        }
                    }
                }
                other => {
                    return Err(protocol_error(format!(
                        "Unknown auth response: {:02X}",
                        other
                    )));
                }
            }
        }
    }

    /// Full `caching_sha2_password` authentication over a plain connection:
    /// fetch the server RSA key and send the encrypted password.
    fn full_auth(&mut self, password: &str, seed: &[u8]) -> Result<()> {
        tracing::debug!("Performing full caching_sha2_password authentication");
        self.write_raw(&[caching_sha2::REQUEST_PUBLIC_KEY])?;
        self.read_packet()?;
        let encrypted = match self.payload.split_first() {
            Some((&caching_sha2::MORE_DATA, pem)) => {
                auth::encrypt_password_rsa(password, seed, pem).map_err(auth_error)?
            }
            Some((&0xFF, _)) => return Err(self.server_error()),
            _ => return Err(protocol_error("Expected RSA public key from server")),
        };
        self.write_raw(&encrypted)
    }

    /// Write `data` as the next packet of the current exchange.
    fn write_raw(&mut self, data: &[u8]) -> Result<()> {
        self.writer.clear();
        self.writer.write_bytes(data);
        self.stream.write_packet(&mut self.writer)
    }

    /// Start a new command exchange with `command` and its argument.
    pub fn write_command(&mut self, command: Command, arg: &[u8]) -> Result<()> {
        self.stream.reset_sequence();
        self.writer.clear();
        self.writer.write_u8(command as u8);
        self.writer.write_bytes(arg);
        self.stream.write_packet(&mut self.writer)
    }

    /// Read one packet that must be OK or ERR.
    pub fn read_ok(&mut self) -> Result<OkPacket> {
        self.read_packet()?;
        self.classify_ok()
    }

    /// Run `SET NAMES <charset>`.
    pub fn set_charset(&mut self, charset: &str) -> Result<()> {
        let sql = format!("SET NAMES {}", charset);
        self.write_command(Command::Query, sql.as_bytes())?;
        self.read_ok().map(|_| ())
    }

    /// Send `COM_PING` and wait for the OK.
    pub fn ping(&mut self) -> Result<()> {
        self.write_command(Command::Ping, &[])?;
        self.read_ok().map(|_| ())
    }

    /// Read the response head of a `COM_QUERY`.
    ///
    /// For a result set this consumes the column definitions (and the EOF
    /// that follows them) and leaves the stream positioned at the first row.
    pub fn query_result_set(&mut self) -> Result<QueryResponse> {
        self.read_packet()?;
        let Some(&first) = self.payload.first() else {
            return Err(protocol_error("Empty query response"));
        };
        match first {
            0x00 => return self.classify_ok().map(QueryResponse::Ok),
            0xFF => return Err(self.server_error()),
            0xFB => return Err(protocol_error("LOCAL INFILE requests are not supported")),
            _ => {}
        }

        let column_count = PacketReader::new(&self.payload)
            .read_lenenc_int()
            .ok_or_else(|| protocol_error("Invalid column count"))? as usize;

        let mut columns = Vec::with_capacity(column_count);
        for _ in 0..column_count {
            self.read_packet()?;
            columns.push(parse_column_def(&self.payload)?);
        }

        if self.capabilities & capabilities::CLIENT_DEPRECATE_EOF == 0 {
            self.read_packet()?;
            let first = self.payload.first().copied().unwrap_or(0);
            if PacketType::from_first_byte(first, self.payload.len()) != PacketType::Eof {
                return Err(self.unexpected_packet());
            }
        }
        Ok(QueryResponse::ResultSet(columns))
    }

    /// Advance to the next row of the current result set.
    ///
    /// Returns `true` when a row was read (its bytes are in
    /// [`Session::payload`]) and `false` at the terminating EOF. An ERR
    /// packet ends the result set with the server error.
    pub fn next_row(&mut self) -> Result<bool> {
        self.read_packet()?;
        match self.payload.first() {
            Some(0xFF) => Err(self.server_error()),
            Some(0xFE) if self.is_result_set_end() => Ok(false),
            Some(_) => Ok(true),
            None => Err(protocol_error("Empty row packet")),
        }
    }

    /// Send `COM_QUIT` best effort and shut the transport down.
    pub fn close(&mut self) -> Result<()> {
        if let Err(e) = self.write_command(Command::Quit, &[]) {
            tracing::debug!(error = %e, "COM_QUIT failed during close");
        }
        self.stream.shutdown()
    }

    fn is_result_set_end(&self) -> bool {
        if self.capabilities & capabilities::CLIENT_DEPRECATE_EOF != 0 {
            self.payload.len() < MAX_PACKET_SIZE
        } else {
            self.payload.len() < 9
        }
    }

    fn classify_ok(&self) -> Result<OkPacket> {
        match self.payload.first() {
            Some(0x00) => PacketReader::new(&self.payload)
                .parse_ok_packet(self.capabilities)
                .ok_or_else(|| self.unexpected_packet()),
            Some(0xFF) => Err(self.server_error()),
            _ => Err(self.unexpected_packet()),
        }
    }

    /// Decode the current ERR packet.
    fn server_error(&self) -> Error {
        match PacketReader::new(&self.payload).parse_err_packet() {
            Some(err) => Error::Server(err),
            None => self.unexpected_packet(),
        }
    }

    fn unexpected_packet(&self) -> Error {
        Error::Protocol(ProtocolError {
            message: format!(
                "unknown error occurred. Payload: {}",
                hex(&self.payload)
            ),
            raw_data: Some(self.payload.clone()),
        })
    }
}

struct Greeting {
    info: ServerInfo,
    auth_plugin: String,
    auth_data: Vec<u8>,
}

/// Parse a protocol v10 greeting.
fn parse_greeting(payload: &[u8]) -> Result<Greeting> {
    let mut reader = PacketReader::new(payload);

    let protocol_version = reader
        .read_u8()
        .ok_or_else(|| protocol_error("Missing protocol version"))?;
    if protocol_version != 10 {
        return Err(protocol_error(format!(
            "Unsupported protocol version: {}",
            protocol_version
        )));
    }

    let server_version = reader
        .read_null_string()
        .ok_or_else(|| protocol_error("Missing server version"))?;
    let connection_id = reader
        .read_u32_le()
        .ok_or_else(|| protocol_error("Missing connection ID"))?;
    let auth_data_1 = reader
        .read_bytes(8)
        .ok_or_else(|| protocol_error("Missing auth data"))?;
    reader.skip(1);

    let caps_lower = reader
        .read_u16_le()
        .ok_or_else(|| protocol_error("Missing capability flags"))?;
    let _charset = reader.read_u8();
    let status_flags = reader.read_u16_le().unwrap_or(0);
    let caps_upper = reader.read_u16_le().unwrap_or(0);
    let server_caps = u32::from(caps_lower) | (u32::from(caps_upper) << 16);

    let auth_data_len = if server_caps & capabilities::CLIENT_PLUGIN_AUTH != 0 {
        reader.read_u8().unwrap_or(0) as usize
    } else {
        0
    };
    reader.skip(10);

    let mut auth_data = auth_data_1.to_vec();
    if server_caps & capabilities::CLIENT_SECURE_CONNECTION != 0 {
        let len2 = auth_data_len.saturating_sub(8).max(13);
        let part2 = reader
            .read_bytes(len2)
            .unwrap_or_else(|| reader.read_rest());
        auth_data.extend_from_slice(trim_nul(part2));
    }

    let auth_plugin = if server_caps & capabilities::CLIENT_PLUGIN_AUTH != 0 {
        reader.read_null_string().unwrap_or_default()
    } else {
        String::new()
    };
    let auth_plugin = if auth_plugin.is_empty() {
        plugins::MYSQL_NATIVE_PASSWORD.to_string()
    } else {
        auth_plugin
    };

    Ok(Greeting {
        info: ServerInfo {
            server_version,
            connection_id,
            capabilities: server_caps,
            status_flags,
        },
        auth_plugin,
        auth_data,
    })
}

/// Parse a column definition packet (protocol 4.1).
fn parse_column_def(data: &[u8]) -> Result<ColumnDef> {
    let mut reader = PacketReader::new(data);
    let mut lenenc = |field: &str| {
        reader
            .read_lenenc_string()
            .ok_or_else(|| protocol_error(format!("Missing {} in column definition", field)))
    };
    let catalog = lenenc("catalog")?;
    let schema = lenenc("schema")?;
    let table = lenenc("table")?;
    let org_table = lenenc("org_table")?;
    let name = lenenc("name")?;
    let org_name = lenenc("org_name")?;

    // length of the fixed-size fields
    let _ = reader.read_lenenc_int();

    let charset = reader.read_u16_le();
    let column_length = reader.read_u32_le();
    let column_type = reader.read_u8();
    let flags = reader.read_u16_le();
    let decimals = reader.read_u8();
    let (
        Some(charset),
        Some(column_length),
        Some(column_type),
        Some(flags),
        Some(decimals),
    ) = (charset, column_length, column_type, flags, decimals)
    else {
        return Err(protocol_error(format!(
            "Truncated column definition for {:?}",
            name
        )));
    };

    Ok(ColumnDef {
        catalog,
        schema,
        table,
        org_table,
        name,
        org_name,
        charset,
        column_length,
        column_type: FieldType::from_u8(column_type),
        flags,
        decimals,
    })
}

fn trim_nul(data: &[u8]) -> &[u8] {
    match data.split_last() {
        Some((0, rest)) => rest,
        _ => data,
    }
}

fn hex(data: &[u8]) -> String {
    data.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConnectionErrorKind;
    use crate::mock::{MOCK_CONNECTION_ID, MOCK_SERVER_VERSION, MockTransport, ScriptBuilder};

    fn params() -> HandshakeParams<'static> {
        HandshakeParams {
            user: "root",
            password: "secret",
            database: "test",
        }
    }

    fn session(script: ScriptBuilder) -> (Session, crate::mock::MockHandle) {
        let transport = script.transport();
        let handle = transport.handle();
        (Session::new(Box::new(transport)), handle)
    }

    #[test]
    fn test_handshake_native_password() {
        let (mut s, handle) = session(
            ScriptBuilder::new()
                .greeting(plugins::MYSQL_NATIVE_PASSWORD)
                .auth_ok(),
        );
        s.handshake(&params()).unwrap();

        assert_eq!(s.server_info().server_version, MOCK_SERVER_VERSION);
        assert_eq!(s.server_info().connection_id, MOCK_CONNECTION_ID);
        assert_eq!(s.capabilities() & capabilities::CLIENT_SSL, 0);
        assert_eq!(s.capabilities() & capabilities::CLIENT_DEPRECATE_EOF, 0);
        assert_ne!(s.capabilities() & capabilities::CLIENT_CONNECT_WITH_DB, 0);

        let packets = handle.packets();
        assert_eq!(packets.len(), 1);
        let response = &packets[0];
        let mut reader = PacketReader::new(response);
        let caps = reader.read_u32_le().unwrap();
        assert_eq!(caps, s.capabilities());
        reader.skip(4);
        assert_eq!(reader.read_u8(), Some(charset::DEFAULT_COLLATION));
        reader.skip(23);
        assert_eq!(reader.read_null_string().as_deref(), Some("root"));
        assert_eq!(reader.read_u8(), Some(20));
        reader.skip(20);
        assert_eq!(reader.read_null_string().as_deref(), Some("test"));
        assert_eq!(
            reader.read_null_string().as_deref(),
            Some(plugins::MYSQL_NATIVE_PASSWORD)
        );
    }

    #[test]
    fn test_handshake_without_database_drops_connect_with_db() {
        let (mut s, handle) = session(
            ScriptBuilder::new()
                .greeting(plugins::MYSQL_NATIVE_PASSWORD)
                .auth_ok(),
        );
        let params = HandshakeParams {
            database: "",
            ..params()
        };
        s.handshake(&params).unwrap();
        assert_eq!(s.capabilities() & capabilities::CLIENT_CONNECT_WITH_DB, 0);

        let response = &handle.packets()[0];
        // plugin name directly follows the 20-byte scramble
        let tail = &response[4 + 4 + 1 + 23 + 5 + 1 + 20..];
        assert_eq!(tail, b"mysql_native_password\0");
    }

    #[test]
    fn test_handshake_caching_sha2_fast_path() {
        let (mut s, handle) = session(
            ScriptBuilder::new()
                .greeting(plugins::CACHING_SHA2_PASSWORD)
                .auth_more_data(caching_sha2::FAST_AUTH_SUCCESS)
                .auth_ok(),
        );
        s.handshake(&params()).unwrap();
        let response = &handle.packets()[0];
        // 32-byte SHA256 scramble
        assert_eq!(response[4 + 4 + 1 + 23 + 5], 32);
    }

    #[test]
    fn test_handshake_auth_switch() {
        let (mut s, handle) = session(
            ScriptBuilder::new()
                .greeting(plugins::CACHING_SHA2_PASSWORD)
                .auth_switch(plugins::MYSQL_NATIVE_PASSWORD)
                .auth_ok(),
        );
        s.handshake(&params()).unwrap();

        let packets = handle.packets();
        assert_eq!(packets.len(), 2);
        assert_eq!(
            packets[1],
            auth::mysql_native_password("secret", crate::mock::MOCK_SCRAMBLE)
        );
    }

    #[test]
    fn test_handshake_access_denied() {
        let script = ScriptBuilder::new()
            .greeting(plugins::MYSQL_NATIVE_PASSWORD)
            .err_in_stream(1045, "28000", "Access denied for user 'root'");
        let (mut s, _) = session(script);
        let err = s.handshake(&params()).unwrap_err();
        match err {
            Error::Connection(e) => {
                assert_eq!(e.kind, ConnectionErrorKind::Authentication);
                assert!(e.message.contains("Access denied"));
                assert!(e.message.contains("1045"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_greeting_rejects_old_protocol() {
        let (mut s, _) = session(ScriptBuilder::new().packet(&[9, b'5', 0]));
        assert!(matches!(s.handshake(&params()), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_set_charset_and_ping() {
        let (mut s, handle) = session(ScriptBuilder::new().handshake().ok());
        s.handshake(&params()).unwrap();
        s.set_charset("utf8mb4").unwrap();
        s.ping().unwrap();

        assert_eq!(handle.queries(), vec!["SET NAMES utf8mb4".to_string()]);
        let packets = handle.packets();
        assert_eq!(packets.last().unwrap(), &vec![Command::Ping as u8]);
    }

    #[test]
    fn test_query_result_set_and_rows() {
        let script = ScriptBuilder::new()
            .handshake()
            .columns(&["id", "name"])
            .text_row(&["1", "alice"])
            .row(&[Some("2"), None])
            .eof();
        let (mut s, _) = session(script);
        s.handshake(&params()).unwrap();
        s.set_charset("utf8mb4").unwrap();

        s.write_command(Command::Query, b"SELECT id, name FROM t")
            .unwrap();
        let QueryResponse::ResultSet(columns) = s.query_result_set().unwrap() else {
            panic!("expected a result set");
        };
        let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["id", "name"]);
        assert_eq!(columns[0].column_type, FieldType::VarString);

        assert!(s.next_row().unwrap());
        assert_eq!(s.payload(), b"\x011\x05alice");
        assert!(s.next_row().unwrap());
        assert_eq!(s.payload(), b"\x012\xFB");
        assert!(!s.next_row().unwrap());
    }

    #[test]
    fn test_query_returns_ok_for_statements() {
        let (mut s, _) = session(ScriptBuilder::new().handshake().ok_with(3, 7));
        s.handshake(&params()).unwrap();
        s.set_charset("utf8mb4").unwrap();
        s.write_command(Command::Query, b"DELETE FROM t").unwrap();
        match s.query_result_set().unwrap() {
            QueryResponse::Ok(ok) => {
                assert_eq!(ok.affected_rows, 3);
                assert_eq!(ok.last_insert_id, 7);
            }
            QueryResponse::ResultSet(_) => panic!("expected OK"),
        }
    }

    #[test]
    fn test_server_error_is_structured() {
        let (mut s, _) = session(ScriptBuilder::new().handshake().err(
            1146,
            "42S02",
            "Table 'test.nope' doesn't exist",
        ));
        s.handshake(&params()).unwrap();
        s.set_charset("utf8mb4").unwrap();
        s.write_command(Command::Query, b"SELECT * FROM nope").unwrap();
        let err = s.query_result_set().unwrap_err();
        let server = err.server_error().unwrap();
        assert_eq!(server.code, 1146);
        assert_eq!(server.sql_state, "42S02");
    }

    #[test]
    fn test_read_ok_rejects_unknown_packet() {
        let (mut s, _) = session(ScriptBuilder::new().handshake().packet(&[0x01]));
        s.handshake(&params()).unwrap();
        s.set_charset("utf8mb4").unwrap();
        let err = s.read_ok().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Protocol error: unknown error occurred. Payload: 01"
        );
    }

    #[test]
    fn test_truncated_stream_is_disconnect() {
        let mut bytes = ScriptBuilder::new().handshake().build();
        bytes.extend_from_slice(&[0x07, 0x00, 0x00, 0x02, 0x00]);
        let mut s = Session::new(Box::new(MockTransport::new(bytes)));
        s.handshake(&params()).unwrap();
        s.set_charset("utf8mb4").unwrap();
        let err = s.read_ok().unwrap_err();
        assert!(err.is_connection_error());
    }

    #[test]
    fn test_stale_reply_after_command_is_protocol_error() {
        // an OK still numbered as the last auth packet
        let mut bytes = ScriptBuilder::new().handshake().build();
        bytes.extend_from_slice(&[0x07, 0x00, 0x00, 0x02]);
        bytes.extend_from_slice(&[0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00]);
        let mut s = Session::new(Box::new(MockTransport::new(bytes)));
        s.handshake(&params()).unwrap();
        s.set_charset("utf8mb4").unwrap();
        assert!(matches!(s.ping(), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_close_sends_quit_and_shuts_down() {
        let (mut s, handle) = session(ScriptBuilder::new().handshake());
        s.handshake(&params()).unwrap();
        s.close().unwrap();
        assert!(handle.is_closed());
        assert_eq!(handle.packets().last().unwrap(), &vec![Command::Quit as u8]);
    }

    #[test]
    fn test_parse_column_def_truncated() {
        let mut w = PacketWriter::new();
        for _ in 0..6 {
            w.write_lenenc_string("x");
        }
        assert!(matches!(
            parse_column_def(w.payload()),
            Err(Error::Protocol(_))
        ));
    }
}
