use log::*;
use std::cmp;
use std::collections::VecDeque;

/// A bounded in-memory byte buffer with a single writer and a single reader.
///
/// Writes beyond the remaining capacity are truncated rather than rejected,
/// the caller must inspect the returned count.
#[derive(Debug)]
pub struct ByteStream {
    capacity: usize,

    buffer: VecDeque<u8>,

    /// Total number of bytes ever accepted by `write`
    bytes_written: u64,

    /// Total number of bytes ever removed by `pop_output`
    bytes_read: u64,

    input_ended: bool,

    error: bool,
}

impl ByteStream {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            buffer: VecDeque::with_capacity(capacity),
            bytes_written: 0,
            bytes_read: 0,
            input_ended: false,
            error: false,
        }
    }

    /// Writes as much of `data` as fits into the remaining capacity.
    pub fn write(&mut self, data: &[u8]) -> usize {
        if self.error {
            warn!("attempted to write to a stream in the error state");
            return 0;
        }

        if self.input_ended {
            warn!("attempted to write to a stream after its input ended");
            return 0;
        }

        let len = cmp::min(data.len(), self.remaining_capacity());
        self.buffer.extend(&data[..len]);
        self.bytes_written += len as u64;

        len
    }

    /// Copies up to `len` bytes from the front of the buffer without consuming them.
    pub fn peek_output(&self, len: usize) -> Vec<u8> {
        if self.error {
            warn!("attempted to read from a stream in the error state");
            return vec![];
        }

        let len = cmp::min(len, self.buffer.len());

        self.buffer.iter().take(len).copied().collect()
    }

    /// Discards up to `len` bytes from the front of the buffer.
    pub fn pop_output(&mut self, len: usize) {
        if self.error {
            warn!("attempted to pop from a stream in the error state");
            return;
        }

        let len = cmp::min(len, self.buffer.len());

        self.buffer.drain(..len);
        self.bytes_read += len as u64;
    }

    pub fn read(&mut self, len: usize) -> Vec<u8> {
        let output = self.peek_output(len);
        self.pop_output(output.len());

        output
    }

    pub fn end_input(&mut self) {
        self.input_ended = true;
    }

    pub fn set_error(&mut self) {
        self.error = true;
    }

    pub fn input_ended(&self) -> bool {
        self.input_ended
    }

    pub fn error(&self) -> bool {
        self.error
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer.len()
    }

    pub fn buffer_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Whether the writer has ended the input and every byte has been read
    pub fn eof(&self) -> bool {
        self.input_ended && self.buffer.is_empty()
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn remaining_capacity(&self) -> usize {
        self.capacity - self.buffer.len()
    }
}
