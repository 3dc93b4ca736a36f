//! Chunked byte queue used for pending writes and message accumulation.

use std::collections::VecDeque;

use bytes::{Buf, BufMut, Bytes, BytesMut};

const CHUNK_SIZE: usize = 4096;

/// A growable FIFO of bytes stored as a list of chunks.
///
/// Appending small slices coalesces into the tail chunk; splicing another
/// queue moves its chunks without copying. Reads peek at a prefix and
/// discard it once consumed.
#[derive(Debug, Default, Clone)]
pub struct ByteQueue {
    chunks: VecDeque<BytesMut>,
    size: usize,
}

impl ByteQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of queued bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.size
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
        self.size = 0;
    }

    /// Append a copy of `data`.
    pub fn put(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let mut rest = data;
        if let Some(tail) = self.chunks.back_mut() {
            let room = tail.capacity() - tail.len();
            let take = room.min(rest.len());
            tail.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
        }
        if !rest.is_empty() {
            let mut chunk = BytesMut::with_capacity(rest.len().max(CHUNK_SIZE));
            chunk.extend_from_slice(rest);
            self.chunks.push_back(chunk);
        }
        self.size += data.len();
    }

    /// Append owned bytes as a chunk of their own.
    pub fn put_bytes(&mut self, data: Bytes) {
        if data.is_empty() {
            return;
        }
        self.size += data.len();
        self.chunks.push_back(BytesMut::from(&data[..]));
    }

    /// Move every byte of `other` to the end of this queue, leaving `other` empty.
    pub fn splice(&mut self, other: &mut ByteQueue) {
        self.size += other.size;
        self.chunks.append(&mut other.chunks);
        other.size = 0;
    }

    /// Copy up to `buf.len()` bytes from the front without consuming them.
    ///
    /// Returns the number of bytes copied.
    pub fn peek(&self, buf: &mut [u8]) -> usize {
        let mut copied = 0;
        for chunk in &self.chunks {
            if copied == buf.len() {
                break;
            }
            let take = chunk.len().min(buf.len() - copied);
            buf[copied..copied + take].copy_from_slice(&chunk[..take]);
            copied += take;
        }
        copied
    }

    /// Drop up to `count` bytes from the front. Returns how many were dropped.
    pub fn discard(&mut self, count: usize) -> usize {
        let mut remaining = count.min(self.size);
        let dropped = remaining;
        while remaining > 0 {
            let Some(front) = self.chunks.front_mut() else {
                break;
            };
            if front.len() <= remaining {
                remaining -= front.len();
                self.chunks.pop_front();
            } else {
                front.advance(remaining);
                remaining = 0;
            }
        }
        self.size -= dropped;
        dropped
    }

    /// Split off the first `count` bytes into a new queue.
    pub fn cut(&mut self, count: usize) -> ByteQueue {
        let mut remaining = count.min(self.size);
        let mut head = ByteQueue::new();
        while remaining > 0 {
            let Some(mut front) = self.chunks.pop_front() else {
                break;
            };
            if front.len() <= remaining {
                remaining -= front.len();
                head.size += front.len();
                head.chunks.push_back(front);
            } else {
                let part = front.split_to(remaining);
                head.size += part.len();
                head.chunks.push_back(part);
                self.chunks.push_front(front);
                remaining = 0;
            }
        }
        self.size -= head.size;
        head
    }

    /// Concatenate all chunks into one contiguous buffer.
    #[must_use]
    pub fn freeze(self) -> Bytes {
        if self.chunks.len() == 1 {
            if let Some(chunk) = self.chunks.into_iter().next() {
                return chunk.freeze();
            }
            return Bytes::new();
        }
        let mut out = BytesMut::with_capacity(self.size);
        for chunk in &self.chunks {
            out.put_slice(chunk);
        }
        out.freeze()
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size);
        for chunk in &self.chunks {
            out.extend_from_slice(chunk);
        }
        out
    }
}

impl Buf for ByteQueue {
    fn remaining(&self) -> usize {
        self.size
    }

    fn chunk(&self) -> &[u8] {
        self.chunks.front().map_or(&[], |c| &c[..])
    }

    fn advance(&mut self, cnt: usize) {
        assert!(cnt <= self.size, "advance past end of ByteQueue");
        self.discard(cnt);
    }
}

impl From<&[u8]> for ByteQueue {
    fn from(data: &[u8]) -> Self {
        let mut queue = ByteQueue::new();
        queue.put(data);
        queue
    }
}

impl From<Vec<u8>> for ByteQueue {
    fn from(data: Vec<u8>) -> Self {
        let mut queue = ByteQueue::new();
        if !data.is_empty() {
            queue.size = data.len();
            queue.chunks.push_back(BytesMut::from(&data[..]));
        }
        queue
    }
}

impl From<Bytes> for ByteQueue {
    fn from(data: Bytes) -> Self {
        let mut queue = ByteQueue::new();
        queue.put_bytes(data);
        queue
    }
}

impl PartialEq for ByteQueue {
    fn eq(&self, other: &Self) -> bool {
        self.size == other.size && self.to_vec() == other.to_vec()
    }
}

impl Eq for ByteQueue {}
