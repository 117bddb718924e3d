//! Replication stream sources.

use crate::error::ReplResult;

/// A positioned pull stream of redo bytes.
///
/// The decoder owns the source and is the only reader. Reads block
/// until bytes arrive; a return of `Ok(0)` means the stream has ended
/// and the local instance is about to become the leader.
pub trait ReplicationSource: Send {
    /// The stream position of the first byte `read` will return.
    fn position(&self) -> u64;

    /// Reads at least one byte into `buf`, returning how many.
    /// `Ok(0)` signals end of stream.
    fn read(&mut self, buf: &mut [u8]) -> ReplResult<usize>;
}

impl<S: ReplicationSource + ?Sized> ReplicationSource for Box<S> {
    fn position(&self) -> u64 {
        (**self).position()
    }

    fn read(&mut self, buf: &mut [u8]) -> ReplResult<usize> {
        (**self).read(buf)
    }
}

/// An in-memory source over a captured byte stream, for tests and for
/// offline decoding of redo log files.
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Vec<u8>,
    offset: usize,
    base_position: u64,
}

impl MemorySource {
    /// Creates a source over `data`, reporting positions starting at
    /// `base_position`.
    #[must_use]
    pub fn new(data: Vec<u8>, base_position: u64) -> Self {
        Self {
            data,
            offset: 0,
            base_position,
        }
    }
}

impl ReplicationSource for MemorySource {
    fn position(&self) -> u64 {
        self.base_position + self.offset as u64
    }

    fn read(&mut self, buf: &mut [u8]) -> ReplResult<usize> {
        let remaining = &self.data[self.offset..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.offset += n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_until_end() {
        let mut source = MemorySource::new(vec![1, 2, 3, 4, 5], 100);
        assert_eq!(source.position(), 100);

        let mut buf = [0u8; 3];
        assert_eq!(source.read(&mut buf).unwrap(), 3);
        assert_eq!(buf, [1, 2, 3]);
        assert_eq!(source.position(), 103);

        assert_eq!(source.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], &[4, 5]);
        assert_eq!(source.read(&mut buf).unwrap(), 0);
        assert_eq!(source.position(), 105);
    }
}
