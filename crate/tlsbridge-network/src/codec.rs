//! Envelope encoding over a byte stream.
//!
//! Each envelope is serialized with bincode and sent as one
//! length-delimited frame, so any number of envelopes can follow each
//! other on the same connection.

use futures::{SinkExt as _, StreamExt as _};
use std::io;
use std::sync::Arc;
use tlsbridge_types::{Envelope, Registry, RegistryError};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt as _};
use tokio_util::bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder, FramedRead, FramedWrite, LengthDelimitedCodec};

/// Largest envelope accepted, once serialized.
pub const MAX_ENVELOPE_SIZE: usize = 8 * 1024 * 1024;

/// Read half of a connection.
pub type BoxRead = Box<dyn AsyncRead + Send + Unpin>;

/// Write half of a connection.
pub type BoxWrite = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error(transparent)]
    Rejected(#[from] RegistryError),

    #[error("failed to serialize envelope: {0}")]
    Serialize(#[from] bincode::Error),

    #[error("failed to write envelope: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The peer closed the stream between two envelopes.
    #[error("end of stream")]
    EndOfStream,

    /// The stream ended in the middle of an envelope.
    #[error("stream ended in the middle of an envelope")]
    Truncated,

    #[error("malformed envelope: {0}")]
    Malformed(#[from] bincode::Error),

    #[error("rejected envelope: {0}")]
    Rejected(#[from] RegistryError),

    #[error("failed to read envelope: {0}")]
    Io(#[from] io::Error),
}

impl DecodeError {
    /// Short name, used as metric label.
    pub(crate) fn reason(&self) -> &'static str {
        match self {
            DecodeError::EndOfStream => "eos",
            DecodeError::Truncated => "truncated",
            DecodeError::Malformed(_) => "malformed",
            DecodeError::Rejected(_) => "rejected",
            DecodeError::Io(_) => "io",
        }
    }
}

/// Length-delimited frames that tell a clean end of stream from a
/// truncated frame.
struct FrameCodec {
    inner: LengthDelimitedCodec,

    /// Part of a frame has been read, maybe only its length header.
    in_frame: bool,
}

impl FrameCodec {
    fn new() -> Self {
        FrameCodec {
            inner: LengthDelimitedCodec::builder()
                .max_frame_length(MAX_ENVELOPE_SIZE)
                .new_codec(),
            in_frame: false,
        }
    }

    fn in_frame(&self) -> bool {
        self.in_frame
    }
}

impl Decoder for FrameCodec {
    type Item = BytesMut;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<BytesMut>, io::Error> {
        let available = src.len();
        let frame = self.inner.decode(src)?;
        // The inner codec keeps the length header once it has read it,
        // so an empty buffer doesn't mean no frame is pending.
        self.in_frame = match frame {
            Some(_) => false,
            None => self.in_frame || !src.is_empty() || src.len() < available,
        };

        Ok(frame)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<BytesMut>, io::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if !self.in_frame => Ok(None),
            None => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "stream ended in the middle of a frame",
            )),
        }
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, data: Bytes, dst: &mut BytesMut) -> Result<(), io::Error> {
        self.inner.encode(data, dst)
    }
}

/// Decodes envelopes from a byte stream.
pub struct EnvelopeReader<R = BoxRead> {
    framed: FramedRead<R, FrameCodec>,
    registry: Arc<Registry>,
}

impl<R> EnvelopeReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(inner: R, registry: Arc<Registry>) -> Self {
        Self {
            framed: FramedRead::new(inner, FrameCodec::new()),
            registry,
        }
    }

    /// Read the next envelope.
    ///
    /// Waits until a whole envelope is available. Envelopes whose
    /// type isn't accepted by the registry are reported as
    /// [DecodeError::Rejected].
    ///
    /// This function is cancel safe: if it's interrupted, no data is
    /// lost.
    pub async fn decode(&mut self) -> Result<Envelope, DecodeError> {
        let frame = match self.framed.next().await {
            None => return Err(DecodeError::EndOfStream),
            Some(Err(err)) if err.kind() == io::ErrorKind::UnexpectedEof => {
                if !self.framed.decoder().in_frame() {
                    // TLS reports a peer that closed the socket without
                    // sending close_notify this way. Nothing was lost.
                    return Err(DecodeError::EndOfStream);
                }
                return Err(DecodeError::Truncated);
            }
            Some(Err(err)) => return Err(DecodeError::Io(err)),
            Some(Ok(frame)) => frame,
        };
        let envelope: Envelope = bincode::deserialize(&frame)?;
        self.registry.check(&envelope)?;

        Ok(envelope)
    }
}

/// Encodes envelopes onto a byte stream.
pub struct EnvelopeWriter<W = BoxWrite> {
    framed: FramedWrite<W, FrameCodec>,
    registry: Arc<Registry>,
}

impl<W> EnvelopeWriter<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(inner: W, registry: Arc<Registry>) -> Self {
        Self {
            framed: FramedWrite::new(inner, FrameCodec::new()),
            registry,
        }
    }

    /// Write the envelope and flush it.
    ///
    /// Envelopes the registry refuses are never written.
    pub async fn encode(&mut self, envelope: &Envelope) -> Result<(), EncodeError> {
        self.registry.check(envelope)?;
        let data = bincode::serialize(envelope)?;
        self.framed.send(Bytes::from(data)).await?;

        Ok(())
    }

    /// Close the write side of the stream.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.framed.get_mut().shutdown().await
    }
}
