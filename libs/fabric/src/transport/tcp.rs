use std::io;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::error::{Error, Result};
use crate::transport::{Connection, Dialer, Event, FrameSink, FrameStream};

/// Longest accepted line, excluding the newline
///
/// Longer lines are skipped up to their newline without being buffered and
/// reported as a read failure; the connection stays usable.
const MAX_LINE: usize = 64 * 1024;

/// TCP dialer with newline framing
///
/// Each frame is sent as one `\n`-terminated line, the way UART-style bus
/// bridges speak. The endpoint is written `tcp://host:port`.
pub struct TcpDialer {
    endpoint: String,
    addr: String,
}

impl TcpDialer {
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let endpoint = endpoint.into();
        let addr = endpoint
            .strip_prefix("tcp://")
            .map(|addr| addr.trim_end_matches('/'))
            .filter(|addr| !addr.is_empty())
            .ok_or_else(|| Error::InvalidEndpoint(endpoint.clone()))?
            .to_string();
        Ok(Self { endpoint, addr })
    }

    /// The `host:port` part of the endpoint
    pub fn addr(&self) -> &str {
        &self.addr
    }
}

#[async_trait::async_trait]
impl Dialer for TcpDialer {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn dial(&self) -> Result<Connection> {
        let stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|e| Error::dial(&self.endpoint, e))?;
        stream.set_nodelay(true)?;

        let (read, write) = stream.into_split();
        Ok(Connection::new(
            TcpLineSink { stream: write },
            TcpLineStream {
                reader: BufReader::new(read),
                line: Vec::new(),
                discarding: false,
            },
        ))
    }
}

struct TcpLineSink {
    stream: OwnedWriteHalf,
}

#[async_trait::async_trait]
impl FrameSink for TcpLineSink {
    async fn send(&mut self, frame: &str) -> Result<()> {
        let mut line = Vec::with_capacity(frame.len() + 1);
        line.extend_from_slice(frame.as_bytes());
        line.push(b'\n');

        self.stream.write_all(&line).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

enum Line {
    Frame(Vec<u8>),
    Oversized,
    Eof,
}

/// Read half with bounded newline framing
///
/// Partial lines survive in `line` across cancelled reads.
struct TcpLineStream {
    reader: BufReader<OwnedReadHalf>,
    line: Vec<u8>,
    discarding: bool,
}

impl TcpLineStream {
    /// Read up to the next newline, never holding more than `MAX_LINE + 1` bytes
    async fn read_line(&mut self) -> io::Result<Line> {
        loop {
            let room = (MAX_LINE + 1 - self.line.len()) as u64;
            let n = (&mut self.reader)
                .take(room)
                .read_until(b'\n', &mut self.line)
                .await?;

            if self.line.last() == Some(&b'\n') {
                let mut line = std::mem::take(&mut self.line);
                if std::mem::take(&mut self.discarding) {
                    return Ok(Line::Oversized);
                }
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return Ok(Line::Frame(line));
            }

            if n == 0 {
                // an unterminated tail is a truncated frame
                self.line.clear();
                self.discarding = false;
                return Ok(Line::Eof);
            }

            if self.line.len() > MAX_LINE {
                self.line.clear();
                self.discarding = true;
            }
        }
    }
}

#[async_trait::async_trait]
impl FrameStream for TcpLineStream {
    async fn receive(&mut self) -> Event {
        loop {
            match self.read_line().await {
                Ok(Line::Frame(bytes)) => match String::from_utf8(bytes) {
                    Ok(line) if line.trim().is_empty() => continue,
                    Ok(line) => return Event::Received(line),
                    Err(e) => {
                        return Event::ReadFailure(Error::custom(format!(
                            "Frame is not valid UTF-8: {e}"
                        )));
                    }
                },
                Ok(Line::Oversized) => {
                    return Event::ReadFailure(Error::custom(format!(
                        "Frame longer than {MAX_LINE} bytes discarded"
                    )));
                }
                Ok(Line::Eof) => return Event::Closed(Error::ConnectionClosed),
                Err(e) => return Event::Closed(e.into()),
            }
        }
    }
}
