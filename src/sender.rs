use crate::{
    ByteStream, RetransmissionTimer, SenderState, SequenceNumber, TcpHeader, TcpSegment,
};
use log::*;
use std::cmp;
use std::collections::VecDeque;

/// A segment which has been transmitted but not yet fully acknowledged.
#[derive(Debug, Clone, PartialEq)]
struct OutstandingSegment {
    /// The absolute sequence number of the first sequence number the segment occupies
    absolute_seqno: u64,
    segment: TcpSegment,
}

impl OutstandingSegment {
    fn end(&self) -> u64 {
        self.absolute_seqno + self.segment.length_in_sequence_space()
    }
}

/// Reads from the outbound byte stream and turns it into segments,
/// keeping track of which have been acknowledged and retransmitting
/// those which have not.
#[derive(Debug)]
pub struct TcpSender {
    state: SenderState,

    isn: SequenceNumber,

    stream: ByteStream,

    /// Segments ready to be handed to the connection
    segments_out: VecDeque<TcpSegment>,

    /// Sent but unacknowledged segments, in order of sequence number
    outstanding: VecDeque<OutstandingSegment>,

    /// The absolute sequence number of the next byte to be sent
    next_seqno: u64,

    /// The highest absolute ack number received from the peer
    ackno: u64,

    /// The window most recently advertised by the peer
    remote_window: u16,

    bytes_in_flight: u64,

    timer: RetransmissionTimer,

    consecutive_retransmissions: u32,

    max_payload_size: usize,
}

impl TcpSender {
    pub fn new(
        capacity: usize,
        rt_timeout: u64,
        max_payload_size: usize,
        isn: SequenceNumber,
    ) -> Self {
        debug!("sender initialised with isn {}", isn);
        Self {
            state: SenderState::Closed,
            isn,
            stream: ByteStream::new(capacity),
            segments_out: VecDeque::new(),
            outstanding: VecDeque::new(),
            next_seqno: 0,
            ackno: 0,
            // Assume the peer can take the SYN before hearing from it
            remote_window: 1,
            bytes_in_flight: 0,
            timer: RetransmissionTimer::new(rt_timeout),
            consecutive_retransmissions: 0,
            max_payload_size,
        }
    }

    pub fn state(&self) -> SenderState {
        if self.stream.error() {
            SenderState::Error
        } else {
            self.state
        }
    }

    fn set_state(&mut self, next: SenderState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid sender state transition {:?} -> {:?}",
            self.state,
            next
        );
        debug!("sender state {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Sends as many segments as the peer's window permits.
    pub fn fill_window(&mut self) {
        match self.state() {
            SenderState::Closed => {
                let mut segment = TcpSegment::default();
                segment.header.syn = true;
                self.send_segment(segment);
                self.set_state(SenderState::SynSent);
            }
            SenderState::SynAcked => self.fill_open_window(),
            _ => {}
        }
    }

    fn fill_open_window(&mut self) {
        // A zero window is treated as one byte so that the peer is probed
        // and eventually tells us about its window opening again.
        let window = cmp::max(self.remote_window, 1) as u64;

        loop {
            let in_window = self.next_seqno - self.ackno;
            if in_window >= window {
                break;
            }
            let remaining = window - in_window;

            let len = cmp::min(
                cmp::min(self.max_payload_size as u64, remaining) as usize,
                self.stream.buffer_size(),
            );
            let payload = self.stream.read(len);

            let fin = self.stream.eof() && remaining > payload.len() as u64;

            if payload.is_empty() && !fin {
                break;
            }

            let segment = TcpSegment::new(
                TcpHeader {
                    fin,
                    ..TcpHeader::default()
                },
                payload,
            );
            self.send_segment(segment);

            if fin {
                self.set_state(SenderState::FinSent);
                break;
            }
        }
    }

    fn send_segment(&mut self, mut segment: TcpSegment) {
        segment.header.seqno = SequenceNumber::wrap(self.next_seqno, self.isn);
        let len = segment.length_in_sequence_space();

        trace!(
            "sending segment {} [syn: {}, fin: {}, len: {}]",
            segment.header.seqno,
            segment.header.syn,
            segment.header.fin,
            segment.payload.len()
        );

        self.outstanding.push_back(OutstandingSegment {
            absolute_seqno: self.next_seqno,
            segment: segment.clone(),
        });
        self.next_seqno += len;
        self.bytes_in_flight += len;
        self.segments_out.push_back(segment);

        if !self.timer.is_running() {
            self.timer.start();
        }
    }

    /// Processes an acknowledgement and window update from the peer.
    pub fn ack_received(&mut self, ackno: SequenceNumber, window_size: u16) {
        let absolute_ackno = ackno.unwrap(self.isn, self.ackno);

        if absolute_ackno > self.next_seqno {
            trace!(
                "ignoring ack {} beyond next sequence number {}",
                absolute_ackno,
                self.next_seqno
            );
            return;
        }

        self.remote_window = window_size;

        if absolute_ackno <= self.ackno {
            return;
        }

        self.ackno = absolute_ackno;
        self.timer.reset_rto();
        self.timer.start();
        self.consecutive_retransmissions = 0;

        while let Some(front) = self.outstanding.front() {
            if front.end() > absolute_ackno {
                break;
            }

            self.bytes_in_flight -= front.segment.length_in_sequence_space();
            self.outstanding.pop_front();
        }

        if self.outstanding.is_empty() {
            self.timer.stop();
        }

        if self.state == SenderState::SynSent && absolute_ackno >= 1 {
            self.set_state(SenderState::SynAcked);
        }

        if self.state == SenderState::FinSent && absolute_ackno == self.next_seqno {
            self.set_state(SenderState::FinAcked);
        }

        self.fill_window();
    }

    /// Advances the retransmission timer, retransmitting the earliest
    /// outstanding segment when it expires.
    pub fn tick(&mut self, ms_since_last_tick: u64) {
        if !self.timer.expired(ms_since_last_tick) {
            return;
        }

        let segment = match self.outstanding.front() {
            Some(outstanding) => outstanding.segment.clone(),
            None => return,
        };

        trace!("retransmitting segment {}", segment.header.seqno);
        self.segments_out.push_back(segment);

        // Backing off while probing a zero window would only delay
        // noticing the window re-opening.
        if self.remote_window > 0 {
            self.consecutive_retransmissions += 1;
            self.timer.double_rto();
        }

        self.timer.start();
    }

    /// Queues a segment occupying no sequence space, used to carry an ack or window update.
    pub fn send_empty_segment(&mut self) {
        let mut segment = TcpSegment::default();
        segment.header.seqno = SequenceNumber::wrap(self.next_seqno, self.isn);

        self.segments_out.push_back(segment);
    }

    pub fn stream_in(&self) -> &ByteStream {
        &self.stream
    }

    pub fn stream_in_mut(&mut self) -> &mut ByteStream {
        &mut self.stream
    }

    pub fn segments_out(&mut self) -> &mut VecDeque<TcpSegment> {
        &mut self.segments_out
    }

    pub fn bytes_in_flight(&self) -> u64 {
        self.bytes_in_flight
    }

    pub fn consecutive_retransmissions(&self) -> u32 {
        self.consecutive_retransmissions
    }

    pub fn next_seqno_absolute(&self) -> u64 {
        self.next_seqno
    }

    pub fn next_seqno(&self) -> SequenceNumber {
        SequenceNumber::wrap(self.next_seqno, self.isn)
    }

    pub fn isn(&self) -> SequenceNumber {
        self.isn
    }

    pub fn rto(&self) -> u64 {
        self.timer.rto()
    }
}
