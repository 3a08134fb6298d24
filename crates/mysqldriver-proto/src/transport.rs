//! Byte transport underneath a session.
//!
//! [`PacketStream`] frames MySQL packets on top of any [`Transport`], reading
//! through a fixed buffer so a result set costs few syscalls. Every
//! `read`/`write` call that reaches the transport is counted in [`Stats`].

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::error::{Error, Result, io_error, protocol_error};
use crate::protocol::{MAX_PACKET_SIZE, PacketHeader, PacketWriter};

/// Size of the read buffer in front of the transport.
const READ_BUFFER_SIZE: usize = 16 * 1024;

/// A bidirectional byte stream to the server.
pub trait Transport: Read + Write + Send + std::fmt::Debug {
    /// Set the deadline applied to each blocking read.
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;

    /// Set the deadline applied to each blocking write.
    fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;

    /// Shut the stream down in both directions.
    fn shutdown(&mut self) -> io::Result<()>;
}

impl Transport for TcpStream {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, timeout)
    }

    fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_write_timeout(self, timeout)
    }

    fn shutdown(&mut self) -> io::Result<()> {
        TcpStream::shutdown(self, Shutdown::Both)
    }
}

#[cfg(unix)]
impl Transport for std::os::unix::net::UnixStream {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        std::os::unix::net::UnixStream::set_read_timeout(self, timeout)
    }

    fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        std::os::unix::net::UnixStream::set_write_timeout(self, timeout)
    }

    fn shutdown(&mut self) -> io::Result<()> {
        std::os::unix::net::UnixStream::shutdown(self, Shutdown::Both)
    }
}

/// Cooperative cancellation flag shared between a connection and its owner.
///
/// Checked before dialing and before every packet read or write. A blocking
/// syscall already in progress is bounded by the read/write timeouts.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of every operation observing this token.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Fail with [`Error::Cancelled`] once the token has been triggered.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// I/O statistics of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Number of read and write calls issued to the transport
    pub syscalls: u64,
}

/// Packet framing over a buffered, counted transport.
#[derive(Debug)]
pub struct PacketStream {
    transport: Box<dyn Transport>,
    rbuf: Box<[u8]>,
    rpos: usize,
    rlen: usize,
    sequence_id: u8,
    stats: Stats,
    cancel: Option<CancelToken>,
}

impl PacketStream {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            transport,
            rbuf: vec![0; READ_BUFFER_SIZE].into_boxed_slice(),
            rpos: 0,
            rlen: 0,
            sequence_id: 0,
            stats: Stats::default(),
            cancel: None,
        }
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = Stats::default();
    }

    pub fn set_cancel_token(&mut self, token: Option<CancelToken>) {
        self.cancel = token;
    }

    /// Apply read and write deadlines to the transport.
    pub fn set_timeouts(
        &mut self,
        read: Option<Duration>,
        write: Option<Duration>,
    ) -> Result<()> {
        self.transport.set_read_timeout(read)?;
        self.transport.set_write_timeout(write)?;
        Ok(())
    }

    /// Start a new command exchange.
    pub fn reset_sequence(&mut self) {
        self.sequence_id = 0;
    }

    /// Read one logical packet into `payload`, joining continuation packets.
    ///
    /// `payload` is cleared first; its allocation is reused.
    pub fn read_packet(&mut self, payload: &mut Vec<u8>) -> Result<()> {
        self.check_cancelled()?;
        payload.clear();
        loop {
            let mut header = [0u8; PacketHeader::SIZE];
            self.read_exact(&mut header)
                .map_err(|e| io_error("Failed to read packet header", e))?;
            let header = PacketHeader::from_bytes(&header);
            if header.sequence_id != self.sequence_id {
                return Err(protocol_error(format!(
                    "packet out of order: expected sequence id {}, got {}",
                    self.sequence_id, header.sequence_id
                )));
            }
            self.sequence_id = self.sequence_id.wrapping_add(1);

            let len = header.payload_length as usize;
            let start = payload.len();
            payload.resize(start + len, 0);
            self.read_exact(&mut payload[start..])
                .map_err(|e| io_error("Failed to read packet payload", e))?;

            if len < MAX_PACKET_SIZE {
                return Ok(());
            }
        }
    }

    /// Frame and write the payload held by `writer`.
    pub fn write_packet(&mut self, writer: &mut PacketWriter) -> Result<()> {
        self.check_cancelled()?;
        let (bytes, next) = writer.finish(self.sequence_id);
        self.sequence_id = next;
        write_all_counted(&mut *self.transport, &mut self.stats, bytes)
            .map_err(|e| io_error("Failed to write packet", e))?;
        self.transport
            .flush()
            .map_err(|e| io_error("Failed to flush stream", e))
    }

    /// Shut the transport down.
    pub fn shutdown(&mut self) -> Result<()> {
        match self.transport.shutdown() {
            Ok(()) => Ok(()),
            // peer already went away
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn check_cancelled(&self) -> Result<()> {
        match &self.cancel {
            Some(token) => token.check(),
            None => Ok(()),
        }
    }

    fn read_exact(&mut self, mut out: &mut [u8]) -> io::Result<()> {
        while !out.is_empty() {
            if self.rpos == self.rlen {
                // large payloads bypass the buffer
                if out.len() >= self.rbuf.len() {
                    let n = read_counted(&mut *self.transport, &mut self.stats, out)?;
                    out = &mut std::mem::take(&mut out)[n..];
                    continue;
                }
                self.rlen = read_counted(&mut *self.transport, &mut self.stats, &mut self.rbuf)?;
                self.rpos = 0;
            }
            let n = out.len().min(self.rlen - self.rpos);
            out[..n].copy_from_slice(&self.rbuf[self.rpos..self.rpos + n]);
            self.rpos += n;
            out = &mut std::mem::take(&mut out)[n..];
        }
        Ok(())
    }
}

/// One counted `read` call. End of stream is an error: a packet is never
/// allowed to end early.
fn read_counted(
    transport: &mut dyn Transport,
    stats: &mut Stats,
    buf: &mut [u8],
) -> io::Result<usize> {
    loop {
        stats.syscalls += 1;
        match transport.read(buf) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed by server",
                ));
            }
            Ok(n) => return Ok(n),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
}

fn write_all_counted(
    transport: &mut dyn Transport,
    stats: &mut Stats,
    mut buf: &[u8],
) -> io::Result<()> {
    while !buf.is_empty() {
        stats.syscalls += 1;
        match transport.write(buf) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "failed to write whole packet",
                ));
            }
            Ok(n) => buf = &buf[n..],
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
