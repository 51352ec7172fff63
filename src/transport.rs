//! DAP transport layer: Content-Length framing over stdio and TCP.
//!
//! The reading and writing halves are split so that a reader thread can feed
//! the session event loop while the session keeps the writer.

use crate::error::{Error, Result, MAX_FRAME_LEN};
use serde_json::Value;
use std::io::{BufRead, BufReader, Read, Stdin, Stdout, Write};
use std::net::TcpStream;

/// Reading half of a DAP endpoint.
pub trait MessageReader: Send {
    /// Read a single DAP message (with Content-Length framing).
    fn read_message(&mut self) -> Result<Value>;
}

/// Writing half of a DAP endpoint.
pub trait MessageWriter: Send {
    /// Write a single DAP message (with Content-Length framing).
    fn write_message(&mut self, message: &Value) -> Result<()>;
}

/// Decode one framed message. Partial frames are absorbed by the underlying
/// buffered reader; the header section ends at the first empty line.
fn read_frame<R: BufRead>(reader: &mut R) -> Result<Value> {
    let mut content_length: Option<usize> = None;
    loop {
        let mut line = String::new();
        let read_n = reader.read_line(&mut line)?;
        if read_n == 0 {
            return Err(Error::ConnectionClosed);
        }
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            break;
        }
        if let Some(v) = line.strip_prefix("Content-Length:") {
            let len = v
                .trim()
                .parse()
                .map_err(|_| Error::MalformedContentLength(v.trim().to_string()))?;
            content_length = Some(len);
        }
    }

    let len = content_length.ok_or(Error::MissingContentLength)?;
    if len > MAX_FRAME_LEN {
        return Err(Error::OversizedFrame(len));
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    let msg: Value = serde_json::from_slice(&buf)?;
    Ok(msg)
}

fn write_frame<W: Write>(writer: &mut W, message: &Value) -> Result<()> {
    let payload = serde_json::to_vec(message)?;
    write!(writer, "Content-Length: {}\r\n\r\n", payload.len())?;
    writer.write_all(&payload)?;
    writer.flush()?;
    Ok(())
}

/// Framed reader over any byte stream.
pub struct FramedReader<R: Read> {
    reader: BufReader<R>,
}

impl<R: Read> FramedReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
        }
    }
}

impl<R: Read + Send> MessageReader for FramedReader<R> {
    fn read_message(&mut self) -> Result<Value> {
        read_frame(&mut self.reader)
    }
}

/// Framed writer over any byte stream.
pub struct FramedWriter<W: Write> {
    writer: W,
}

impl<W: Write> FramedWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { writer: inner }
    }
}

impl<W: Write + Send> MessageWriter for FramedWriter<W> {
    fn write_message(&mut self, message: &Value) -> Result<()> {
        write_frame(&mut self.writer, message)
    }
}

/// Editor-facing endpoint over stdio (embedded mode).
pub fn stdio_endpoint() -> (FramedReader<Stdin>, FramedWriter<Stdout>) {
    (
        FramedReader::new(std::io::stdin()),
        FramedWriter::new(std::io::stdout()),
    )
}

/// Editor-facing endpoint over an accepted TCP stream (server mode).
pub fn tcp_endpoint(stream: TcpStream) -> Result<(FramedReader<TcpStream>, FramedWriter<TcpStream>)> {
    stream.set_nodelay(true)?;
    let reader = FramedReader::new(stream.try_clone()?);
    Ok((reader, FramedWriter::new(stream)))
}
