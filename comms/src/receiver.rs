use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{Align8, Deserialize, LEN_TYPE_SIZE, LenType, MAX_FRAME_LEN, frame_too_large};

/// The reading half of a framed channel.
pub struct OnoReceiver<R: AsyncRead + Unpin> {
    rx: R,
}

impl<R: AsyncRead + Unpin> OnoReceiver<R> {
    pub(super) fn new(rx: R) -> Self {
        Self { rx }
    }

    /// Waits for the next frame and decodes it out of `buf`.
    ///
    /// `buf` is resized to fit the frame, so the same buffer can be reused for
    /// every call. The returned `T` borrows from it.
    ///
    /// # Arguments
    /// * `buf` - The buffer the frame body is read into.
    ///
    /// # Returns
    /// The decoded `T`, `io::ErrorKind::UnexpectedEof` if the stream ended, or
    /// any other io error.
    pub async fn recv_into<'buf, T, B>(&mut self, buf: &'buf mut Vec<B>) -> io::Result<T>
    where
        T: Deserialize<'buf>,
        B: Align8,
    {
        self.recv_bounded(buf, MAX_FRAME_LEN).await
    }

    /// Like `recv_into`, refusing bodies longer than `max_len` before reading them.
    pub async fn recv_bounded<'buf, T, B>(
        &mut self,
        buf: &'buf mut Vec<B>,
        max_len: usize,
    ) -> io::Result<T>
    where
        T: Deserialize<'buf>,
        B: Align8,
    {
        let mut len_buf = [0; LEN_TYPE_SIZE];
        self.rx.read_exact(&mut len_buf).await?;

        let limit = max_len.min(MAX_FRAME_LEN);
        let len = LenType::from_be_bytes(len_buf) as usize;
        if len > limit {
            return Err(frame_too_large(len, limit));
        }

        buf.clear();
        buf.resize(len.div_ceil(size_of::<B>()), B::zeroed());

        let body = &mut bytemuck::cast_slice_mut::<B, u8>(buf.as_mut_slice())[..len];
        self.rx.read_exact(body).await?;

        T::deserialize(body)
    }
}
