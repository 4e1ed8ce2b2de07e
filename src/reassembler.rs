use crate::ByteStream;
use log::*;
use std::cmp;
use std::collections::BTreeMap;

/// Reassembles possibly out-of-order and overlapping substrings into
/// a contiguous byte stream.
///
/// Pending substrings are kept in a map keyed by their absolute start index.
/// Stored ranges never overlap nor touch each other: any incoming range is
/// coalesced with its neighbours before insertion.
#[derive(Debug)]
pub struct StreamReassembler {
    output: ByteStream,

    /// The index of the next byte the output stream expects.
    first_unassembled: u64,

    /// Substrings which cannot be written yet due to gaps in the stream.
    pending: BTreeMap<u64, Vec<u8>>,

    /// Total number of bytes held in `pending`
    unassembled_bytes: u64,

    /// The index one past the last byte of the stream, once known.
    eof_index: Option<u64>,
}

impl StreamReassembler {
    pub fn new(capacity: usize) -> Self {
        Self {
            output: ByteStream::new(capacity),
            first_unassembled: 0,
            pending: BTreeMap::new(),
            unassembled_bytes: 0,
            eof_index: None,
        }
    }

    /// Accepts a substring starting at absolute byte `index`, writing any newly
    /// contiguous bytes to the output stream.
    pub fn push_substring(&mut self, data: &[u8], index: u64, eof: bool) {
        if eof {
            self.eof_index = Some(index + data.len() as u64);
        }

        if !data.is_empty() {
            self.insert(data, index);
            self.assemble();
        }

        self.close_if_complete();
    }

    fn insert(&mut self, data: &[u8], index: u64) {
        let end = index + data.len() as u64;
        let lo = cmp::max(index, self.first_unassembled);
        let hi = cmp::min(end, self.first_unacceptable());

        if lo >= hi {
            trace!(
                "discarding substring [{}, {}) outside of window [{}, {})",
                index,
                end,
                self.first_unassembled,
                self.first_unacceptable()
            );
            return;
        }

        // Every stored range which overlaps or is adjacent to [lo, hi)
        // is removed and coalesced into a single range.
        let neighbours = self
            .pending
            .range(..=hi)
            .rev()
            .take_while(|(start, bytes)| **start + bytes.len() as u64 >= lo)
            .map(|(start, _)| *start)
            .collect::<Vec<u64>>();

        let mut merged_start = lo;
        let mut merged_end = hi;
        let mut removed = Vec::with_capacity(neighbours.len());

        for start in neighbours {
            if let Some(bytes) = self.pending.remove(&start) {
                self.unassembled_bytes -= bytes.len() as u64;
                merged_start = cmp::min(merged_start, start);
                merged_end = cmp::max(merged_end, start + bytes.len() as u64);
                removed.push((start, bytes));
            }
        }

        let mut merged = vec![0u8; (merged_end - merged_start) as usize];

        for (start, bytes) in removed {
            let offset = (start - merged_start) as usize;
            merged[offset..offset + bytes.len()].copy_from_slice(&bytes);
        }

        let offset = (lo - merged_start) as usize;
        merged[offset..offset + (hi - lo) as usize]
            .copy_from_slice(&data[(lo - index) as usize..(hi - index) as usize]);

        self.unassembled_bytes += merged.len() as u64;
        self.pending.insert(merged_start, merged);
    }

    fn assemble(&mut self) {
        loop {
            let start = match self.pending.keys().next() {
                Some(start) if *start == self.first_unassembled => *start,
                _ => break,
            };

            let bytes = match self.pending.remove(&start) {
                Some(bytes) => bytes,
                None => break,
            };
            self.unassembled_bytes -= bytes.len() as u64;

            let written = self.output.write(&bytes);
            self.first_unassembled += written as u64;

            if written < bytes.len() {
                // Only reachable if the output stream refused bytes (error state)
                let rest = bytes[written..].to_vec();
                self.unassembled_bytes += rest.len() as u64;
                self.pending.insert(self.first_unassembled, rest);
                break;
            }
        }
    }

    fn close_if_complete(&mut self) {
        if self.eof_index == Some(self.first_unassembled) && !self.output.input_ended() {
            debug!(
                "reassembled stream ended after {} bytes",
                self.first_unassembled
            );
            self.output.end_input();
        }
    }

    /// The number of bytes stored but not yet reassembled
    pub fn unassembled_bytes(&self) -> u64 {
        self.unassembled_bytes
    }

    pub fn empty(&self) -> bool {
        self.unassembled_bytes == 0
    }

    pub fn first_unassembled(&self) -> u64 {
        self.first_unassembled
    }

    /// The index of the first byte beyond the acceptance window
    pub fn first_unacceptable(&self) -> u64 {
        self.first_unassembled + self.output.remaining_capacity() as u64
    }

    pub fn stream_out(&self) -> &ByteStream {
        &self.output
    }

    pub fn stream_out_mut(&mut self) -> &mut ByteStream {
        &mut self.output
    }
}
