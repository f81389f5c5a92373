//! Message coalescing and size limits.
//!
//! When several messages are waiting for the same peer they are flushed as a
//! single text frame with the individual messages separated by a newline.
//! Receivers recover the boundaries with [`split`].

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Maximum size of a single inbound message in bytes.
pub const MAX_MESSAGE_SIZE: usize = 512;

/// Separator between coalesced messages.
pub const DELIMITER: u8 = b'\n';

/// Protocol errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Message exceeds the configured maximum size.
    #[error("Message size {size} exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },
}

/// Check a payload against a size limit.
///
/// # Errors
///
/// Returns [`ProtocolError::FrameTooLarge`] if the payload is longer than `max`.
pub fn check_size(payload: &[u8], max: usize) -> Result<(), ProtocolError> {
    if payload.len() > max {
        return Err(ProtocolError::FrameTooLarge {
            size: payload.len(),
            max,
        });
    }
    Ok(())
}

/// Accumulates queued messages into one outbound frame.
#[derive(Debug)]
pub struct Coalescer {
    buf: BytesMut,
    count: usize,
}

impl Coalescer {
    /// Start a batch with its first message.
    #[must_use]
    pub fn new(first: &[u8]) -> Self {
        let mut buf = BytesMut::with_capacity(first.len());
        buf.extend_from_slice(first);
        Self { buf, count: 1 }
    }

    /// Append another message, preceded by the delimiter.
    pub fn push(&mut self, message: &[u8]) {
        self.buf.reserve(1 + message.len());
        self.buf.put_u8(DELIMITER);
        self.buf.extend_from_slice(message);
        self.count += 1;
    }

    /// Number of messages in the batch.
    #[must_use]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Size of the batch in bytes, delimiters included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether the batch holds no bytes (only possible with one empty message).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Finish the batch.
    #[must_use]
    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Coalesce messages into one frame payload.
///
/// Returns `None` if `messages` is empty.
pub fn coalesce<I, B>(messages: I) -> Option<Bytes>
where
    I: IntoIterator<Item = B>,
    B: AsRef<[u8]>,
{
    let mut iter = messages.into_iter();
    let first = iter.next()?;
    let mut batch = Coalescer::new(first.as_ref());
    for message in iter {
        batch.push(message.as_ref());
    }
    Some(batch.finish())
}

/// Split a received frame back into its individual messages.
pub fn split(frame: &[u8]) -> impl Iterator<Item = &[u8]> {
    frame.split(|b| *b == DELIMITER)
}

/// Split a received frame into owned messages without copying.
#[must_use]
pub fn split_bytes(frame: &Bytes) -> Vec<Bytes> {
    let mut parts = Vec::new();
    let mut start = 0;
    for (i, b) in frame.iter().enumerate() {
        if *b == DELIMITER {
            parts.push(frame.slice(start..i));
            start = i + 1;
        }
    }
    parts.push(frame.slice(start..));
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_message_has_no_delimiter() {
        let frame = coalesce([b"hello".as_slice()]).unwrap();
        assert_eq!(&frame[..], b"hello");
    }

    #[test]
    fn test_coalesce_joins_with_newline() {
        let frame = coalesce(["a", "bc", "def"]).unwrap();
        assert_eq!(&frame[..], b"a\nbc\ndef");

        let parts: Vec<&[u8]> = split(&frame).collect();
        assert_eq!(parts, vec![b"a".as_slice(), b"bc".as_slice(), b"def".as_slice()]);
    }

    #[test]
    fn test_coalesce_empty() {
        assert!(coalesce(Vec::<Bytes>::new()).is_none());
    }

    #[test]
    fn test_coalescer_counts() {
        let mut batch = Coalescer::new(b"one");
        batch.push(b"two");
        assert_eq!(batch.count(), 2);
        assert_eq!(batch.len(), 7);
        assert!(!batch.is_empty());
    }

    #[test]
    fn test_split_bytes_is_zero_copy() {
        let frame = Bytes::from_static(b"x\ny\n");
        let parts = split_bytes(&frame);
        assert_eq!(parts.len(), 3);
        assert_eq!(&parts[0][..], b"x");
        assert_eq!(&parts[1][..], b"y");
        assert!(parts[2].is_empty());
    }

    #[test]
    fn test_check_size() {
        assert!(check_size(&[0u8; MAX_MESSAGE_SIZE], MAX_MESSAGE_SIZE).is_ok());
        let err = check_size(&[0u8; MAX_MESSAGE_SIZE + 1], MAX_MESSAGE_SIZE).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::FrameTooLarge { size: 513, max: 512 }
        ));
    }
}
