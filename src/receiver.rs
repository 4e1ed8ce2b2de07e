use crate::{ByteStream, ReceiverState, SequenceNumber, StreamReassembler, TcpSegment};
use log::*;

/// Accepts incoming segments, feeding their payload into the reassembler
/// and computing the ack number and window to report back to the peer.
#[derive(Debug)]
pub struct TcpReceiver {
    reassembler: StreamReassembler,

    /// The peer's initial sequence number, latched from the first SYN
    isn: Option<SequenceNumber>,
}

impl TcpReceiver {
    pub fn new(capacity: usize) -> Self {
        Self {
            reassembler: StreamReassembler::new(capacity),
            isn: None,
        }
    }

    pub fn state(&self) -> ReceiverState {
        let stream = self.reassembler.stream_out();

        if stream.error() {
            ReceiverState::Error
        } else if self.isn.is_none() {
            ReceiverState::Listen
        } else if stream.input_ended() {
            ReceiverState::FinReceived
        } else {
            ReceiverState::SynReceived
        }
    }

    pub fn segment_received(&mut self, segment: &TcpSegment) {
        let header = segment.header();

        let isn = match self.isn {
            Some(isn) => isn,
            None if header.syn => {
                debug!("received SYN with isn {}", header.seqno);
                self.isn = Some(header.seqno);
                header.seqno
            }
            None => {
                trace!("dropping segment {} received before SYN", header.seqno);
                return;
            }
        };

        if segment.length_in_sequence_space() == 0 {
            return;
        }

        let absolute_seqno = header
            .seqno
            .unwrap(isn, self.reassembler.first_unassembled());

        // The SYN occupies absolute sequence number 0 while the first payload
        // byte is stream index 0, so payload bytes sit one behind their seqno.
        let stream_index = if header.syn {
            absolute_seqno
        } else {
            match absolute_seqno.checked_sub(1) {
                Some(index) => index,
                None => {
                    trace!("dropping segment {} claiming the SYN's seqno", header.seqno);
                    return;
                }
            }
        };

        self.reassembler
            .push_substring(segment.payload(), stream_index, header.fin);
    }

    /// The ack number to send to the peer, absent until the SYN has been received.
    pub fn ackno(&self) -> Option<SequenceNumber> {
        let isn = self.isn?;

        // The SYN and, once the stream has ended, the FIN each occupy a sequence number
        let absolute_ackno = self.reassembler.first_unassembled()
            + 1
            + self.reassembler.stream_out().input_ended() as u64;

        Some(SequenceNumber::wrap(absolute_ackno, isn))
    }

    pub fn window_size(&self) -> u64 {
        self.reassembler.first_unacceptable() - self.reassembler.first_unassembled()
    }

    pub fn unassembled_bytes(&self) -> u64 {
        self.reassembler.unassembled_bytes()
    }

    pub fn stream_out(&self) -> &ByteStream {
        self.reassembler.stream_out()
    }

    pub fn stream_out_mut(&mut self) -> &mut ByteStream {
        self.reassembler.stream_out_mut()
    }
}
