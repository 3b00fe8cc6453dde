use std::io;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::{LEN_TYPE_SIZE, LenType, MAX_FRAME_LEN, Serialize, frame_too_large};

/// The writing half of a framed channel.
///
/// Keeps one scratch buffer for the owned part of every frame, borrowed
/// payloads are written straight from the caller's memory.
pub struct OnoSender<W: AsyncWrite + Unpin> {
    tx: W,
    scratch: Vec<u8>,
}

impl<W: AsyncWrite + Unpin> OnoSender<W> {
    pub(super) fn new(tx: W) -> Self {
        Self {
            tx,
            scratch: Vec::new(),
        }
    }

    /// Writes `msg` as a single frame and flushes it.
    ///
    /// # Arguments
    /// * `msg` - A serializable object.
    ///
    /// # Returns
    /// An io error if `msg` can't be encoded, is larger than `MAX_FRAME_LEN`
    /// or the writer fails.
    pub async fn send<'a, T: Serialize<'a>>(&mut self, msg: &'a T) -> io::Result<()> {
        let Self { tx, scratch } = self;

        scratch.clear();
        scratch.extend_from_slice(&[0; LEN_TYPE_SIZE]);

        let tail = msg.serialize(scratch)?;
        let body_len = scratch.len() - LEN_TYPE_SIZE + tail.map_or(0, <[u8]>::len);
        if body_len > MAX_FRAME_LEN {
            return Err(frame_too_large(body_len, MAX_FRAME_LEN));
        }

        scratch[..LEN_TYPE_SIZE].copy_from_slice(&(body_len as LenType).to_be_bytes());
        tx.write_all(scratch).await?;

        if let Some(tail) = tail {
            tx.write_all(tail).await?;
        }

        tx.flush().await
    }

    /// Shuts down the writer, the peer observes an end of stream.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.tx.shutdown().await
    }
}
