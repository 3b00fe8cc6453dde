//! The traits framing a message body.

use std::io;

/// Primitive numbers aligned to 8 bytes.
///
/// Receive buffers of these types can hold a `Reduce` payload and hand it out
/// as an `&[f64]` without copying.
pub trait Align8: bytemuck::Pod {}

impl Align8 for u64 {}
impl Align8 for i64 {}
impl Align8 for f64 {}
impl Align8 for u128 {}
impl Align8 for i128 {}

/// Types that can be written into a frame body.
pub trait Serialize<'a> {
    /// Writes the owned part of `self` into `buf`.
    ///
    /// # Arguments
    /// * `buf` - The frame buffer, already containing the length prefix.
    ///
    /// # Returns
    /// An optional borrowed tail to be written right after `buf` without copying,
    /// or an io error if `self` can't be encoded.
    fn serialize(&'a self, buf: &mut Vec<u8>) -> io::Result<Option<&'a [u8]>>;
}

/// Types that can be decoded from a received frame body, borrowing from it.
pub trait Deserialize<'a>: Sized {
    fn deserialize(buf: &'a mut [u8]) -> io::Result<Self>;
}
