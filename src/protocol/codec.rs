use bytes::{Bytes, BytesMut};
use prost::Message;
use tokio::net::TcpStream;
use tokio_util::codec::{Decoder, Encoder, Framed, LengthDelimitedCodec};

use crate::error::HeraError;
use crate::protocol::message::Frame;

/// Largest frame accepted from a peer.
pub const MAX_FRAME_LENGTH: usize = 8 * 1024 * 1024;

/// Length-prefixed protobuf framing: a 4-byte big-endian length followed by
/// an encoded [`Frame`].
#[derive(Debug)]
pub struct FrameCodec {
    inner: LengthDelimitedCodec,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    pub fn new() -> Self {
        Self {
            inner: LengthDelimitedCodec::builder()
                .max_frame_length(MAX_FRAME_LENGTH)
                .new_codec(),
        }
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = HeraError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, HeraError> {
        match self.inner.decode(src)? {
            Some(buf) => Ok(Some(Frame::decode(buf.freeze())?)),
            None => Ok(None),
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = HeraError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), HeraError> {
        self.inner.encode(Bytes::from(item.encode_to_vec()), dst)?;
        Ok(())
    }
}

pub type FramedConnection = Framed<TcpStream, FrameCodec>;

pub fn framed(stream: TcpStream) -> FramedConnection {
    Framed::new(stream, FrameCodec::new())
}
