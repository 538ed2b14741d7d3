use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;

use crate::proto::command::Message;
use crate::proto::{frame, wire};
use crate::{Error, Result};

/// Buffered, framed message I/O over one TCP stream. Used on both sides
/// of the wire: the server's connection handler and the SDK client.
#[derive(Debug)]
pub struct Connection {
    stream: BufWriter<TcpStream>,
    buffer: BytesMut,
}

impl Connection {
    pub fn new(socket: TcpStream) -> Connection {
        Connection {
            stream: BufWriter::new(socket),
            buffer: BytesMut::with_capacity(4 * 1024),
        }
    }

    /// Reads the next complete message, buffering partial frames across
    /// reads. Returns `Ok(None)` on a clean EOF between frames; an EOF
    /// mid-frame is a codec error.
    pub async fn read_message(&mut self) -> Result<Option<Message>> {
        loop {
            if let Some((kind, payload)) = frame::try_extract(&mut self.buffer)? {
                return wire::decode(kind, payload).map(Some);
            }

            if 0 == self.stream.read_buf(&mut self.buffer).await? {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Err(Error::codec("connection reset mid-frame"));
            }
        }
    }

    /// Encodes and writes one message, flushing the stream so the peer
    /// sees it immediately.
    pub async fn write_message(&mut self, msg: &Message) -> Result<()> {
        let framed = match msg {
            Message::Command(cmd) => wire::encode_command(cmd)?,
            Message::Response(resp) => wire::encode_response(resp)?,
        };
        self.stream.write_all(&framed).await?;
        self.stream.flush().await?;
        Ok(())
    }
}
