//! Length-prefixed message framing over any async byte stream.
//!
//! Every frame is a big-endian `u64` body length followed by the body, bodies
//! are encoded by `msg::Msg`.

mod codec;
pub mod msg;
mod receiver;
mod sender;

use std::io;

use tokio::io::{AsyncRead, AsyncWrite};

pub use codec::{Align8, Deserialize, Serialize};
pub use receiver::OnoReceiver;
pub use sender::OnoSender;

type LenType = u64;
const LEN_TYPE_SIZE: usize = size_of::<LenType>();

/// Bodies larger than this are refused by both ends.
pub const MAX_FRAME_LEN: usize = 1 << 31;

fn frame_too_large(len: usize, limit: usize) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("frame of {len} bytes exceeds the {limit} bytes limit"),
    )
}

/// Creates both `OnoReceiver` and `OnoSender` network channel parts.
///
/// # Arguments
/// * `rx` - An async readable.
/// * `tx` - An async writable.
///
/// # Returns
/// A communication stream in the form of an ono receiver and sender.
pub fn channel<R, W>(rx: R, tx: W) -> (OnoReceiver<R>, OnoSender<W>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    (OnoReceiver::new(rx), OnoSender::new(tx))
}
