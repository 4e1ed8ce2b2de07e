use crate::{
    ByteStream, ReceiverState, SenderState, SequenceNumber, TcpConfig, TcpReceiver, TcpSegment,
    TcpSender, TcpState,
};
use log::*;
use rand::Rng;
use std::cmp;
use std::collections::VecDeque;
use std::mem;

/// A full-duplex TCP connection composed of a sender and a receiver.
///
/// The connection performs no I/O and keeps no clock of its own: the owner feeds
/// it incoming segments and the passage of time, and drains the outgoing queue
/// via [`TcpConnection::segments_out`] after every call.
#[derive(Debug)]
pub struct TcpConnection {
    config: TcpConfig,

    sender: TcpSender,

    receiver: TcpReceiver,

    segments_out: VecDeque<TcpSegment>,

    active: bool,

    linger_after_streams_finish: bool,

    time_since_last_segment_received: u64,
}

impl TcpConnection {
    /// Creates a connection using the configured ISN, or a random one if unset.
    pub fn new(config: TcpConfig) -> Self {
        Self::with_rng(config, &mut rand::thread_rng())
    }

    /// Creates a connection drawing its ISN from `rng` unless the config fixes one.
    pub fn with_rng<R: Rng>(config: TcpConfig, rng: &mut R) -> Self {
        let isn = SequenceNumber(config.fixed_isn().unwrap_or_else(|| rng.gen()));

        Self {
            sender: TcpSender::new(
                config.send_capacity(),
                config.rt_timeout(),
                config.max_payload_size(),
                isn,
            ),
            receiver: TcpReceiver::new(config.recv_capacity()),
            segments_out: VecDeque::new(),
            active: true,
            linger_after_streams_finish: config.linger_after_streams_finish(),
            time_since_last_segment_received: 0,
            config,
        }
    }

    /// Initiates the connection by sending a SYN.
    pub fn connect(&mut self) {
        if self.sender.state() != SenderState::Closed {
            warn!("connect called on a connection which has already started");
            return;
        }

        debug!("connecting, isn {}", self.sender.isn());
        self.sender.fill_window();
        self.flush_sender_segments();
    }

    /// Writes to the outbound stream and sends what the peer's window permits.
    /// Returns the number of bytes accepted into the outbound stream.
    pub fn write(&mut self, data: &[u8]) -> usize {
        let written = self.sender.stream_in_mut().write(data);
        self.sender.fill_window();
        self.flush_sender_segments();

        written
    }

    /// Shuts down the outbound stream, the inbound stream may still be read.
    pub fn end_input_stream(&mut self) {
        self.sender.stream_in_mut().end_input();
        self.sender.fill_window();
        self.flush_sender_segments();
    }

    pub fn segment_received(&mut self, segment: &TcpSegment) {
        if !self.active {
            trace!("ignoring segment received on inactive connection");
            return;
        }

        let header = segment.header();

        if self.receiver.state() == ReceiverState::Listen
            && self.sender.state() == SenderState::Closed
            && !header.syn
        {
            trace!("ignoring non-SYN segment while listening");
            return;
        }

        self.time_since_last_segment_received = 0;

        if header.rst {
            warn!("connection reset by peer");
            self.set_reset_state(false);
            return;
        }

        self.receiver.segment_received(segment);

        // Passive open: reply to the peer's SYN with our own SYN (and ACK)
        if self.receiver.state() == ReceiverState::SynReceived
            && self.sender.state() == SenderState::Closed
        {
            self.connect();
            return;
        }

        // If the peer finished first we are the passive closer
        // and there is nothing to wait for once our FIN is acknowledged.
        if self.inbound_ended() && !self.sender.state().fin_sent() {
            if self.linger_after_streams_finish {
                debug!("inbound stream ended first, disabling linger");
            }
            self.linger_after_streams_finish = false;
        }

        if header.ack {
            self.sender.ack_received(header.ackno, header.win);
        }

        if self.inbound_ended() && self.outbound_ended_and_acked() && !self.linger_after_streams_finish
        {
            debug!("both streams finished, connection closed");
            self.active = false;
            return;
        }

        if segment.length_in_sequence_space() > 0 && self.sender.segments_out().is_empty() {
            self.sender.send_empty_segment();
        }

        self.flush_sender_segments();
    }

    /// Informs the connection of the passage of time.
    pub fn tick(&mut self, ms_since_last_tick: u64) {
        if !self.active {
            return;
        }

        self.time_since_last_segment_received = self
            .time_since_last_segment_received
            .saturating_add(ms_since_last_tick);

        self.sender.tick(ms_since_last_tick);

        if self.sender.consecutive_retransmissions() > self.config.max_retx_attempts() {
            warn!(
                "aborting connection after {} consecutive retransmissions",
                self.sender.consecutive_retransmissions()
            );
            self.set_reset_state(true);
            return;
        }

        self.flush_sender_segments();

        if self.inbound_ended() && self.outbound_ended_and_acked() {
            if !self.linger_after_streams_finish
                || self.time_since_last_segment_received >= 10 * self.config.rt_timeout()
            {
                debug!("linger period over, connection closed");
                self.active = false;
            }
        }
    }

    /// Aborts the connection, sending a RST to the peer.
    pub fn abort(&mut self) {
        if !self.active {
            return;
        }

        self.set_reset_state(true);
    }

    /// Consumes the connection, aborting it if still active, and returns
    /// whatever was left in the outgoing queue (including any RST).
    pub fn close(mut self) -> VecDeque<TcpSegment> {
        self.abort();

        mem::take(&mut self.segments_out)
    }

    fn set_reset_state(&mut self, send_rst: bool) {
        self.receiver.stream_out_mut().set_error();
        self.sender.stream_in_mut().set_error();
        self.linger_after_streams_finish = false;
        self.active = false;

        if send_rst {
            let mut segment = TcpSegment::default();
            segment.header.seqno = self.sender.next_seqno();
            segment.header.rst = true;
            self.segments_out.push_back(segment);
        }
    }

    /// Moves everything the sender has queued to the outgoing queue,
    /// stamping each segment with the current ack number and window.
    fn flush_sender_segments(&mut self) {
        let ackno = self.receiver.ackno();
        let window = cmp::min(self.receiver.window_size(), u16::MAX as u64) as u16;

        while let Some(mut segment) = self.sender.segments_out().pop_front() {
            if let Some(ackno) = ackno {
                segment.header.ack = true;
                segment.header.ackno = ackno;
            }
            segment.header.win = window;

            self.segments_out.push_back(segment);
        }
    }

    /// The inbound stream has been fully reassembled and has ended
    fn inbound_ended(&self) -> bool {
        self.receiver.unassembled_bytes() == 0 && self.receiver.stream_out().input_ended()
    }

    /// The outbound stream has ended, been fully sent including the FIN,
    /// and been fully acknowledged by the peer
    fn outbound_ended_and_acked(&self) -> bool {
        let stream = self.sender.stream_in();

        stream.eof()
            && self.sender.next_seqno_absolute() == stream.bytes_written() + 2
            && self.sender.bytes_in_flight() == 0
    }

    pub fn segments_out(&mut self) -> &mut VecDeque<TcpSegment> {
        &mut self.segments_out
    }

    pub fn active(&self) -> bool {
        self.active
    }

    pub fn state(&self) -> TcpState {
        TcpState::summarise(
            self.receiver.state(),
            self.sender.state(),
            self.active,
            self.linger_after_streams_finish,
        )
    }

    pub fn remaining_outbound_capacity(&self) -> usize {
        self.sender.stream_in().remaining_capacity()
    }

    pub fn bytes_in_flight(&self) -> u64 {
        self.sender.bytes_in_flight()
    }

    pub fn unassembled_bytes(&self) -> u64 {
        self.receiver.unassembled_bytes()
    }

    pub fn time_since_last_segment_received(&self) -> u64 {
        self.time_since_last_segment_received
    }

    pub fn inbound_stream(&self) -> &ByteStream {
        self.receiver.stream_out()
    }

    pub fn inbound_stream_mut(&mut self) -> &mut ByteStream {
        self.receiver.stream_out_mut()
    }

    pub fn outbound_stream(&self) -> &ByteStream {
        self.sender.stream_in()
    }

    pub fn config(&self) -> &TcpConfig {
        &self.config
    }
}

// Anything queued here is lost with the connection, use `close` to retrieve the RST.
impl Drop for TcpConnection {
    fn drop(&mut self) {
        if self.active {
            warn!("unclean shutdown of connection in state {}, aborting", self.state());
            self.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TcpHeader;

    const ISN: SequenceNumber = SequenceNumber(5000);
    const PEER_ISN: SequenceNumber = SequenceNumber(9000);

    fn config() -> TcpConfig {
        TcpConfig::default()
            .with_fixed_isn(Some(ISN.0))
            .with_rt_timeout(100)
            .with_max_retx_attempts(3)
    }

    fn drain(connection: &mut TcpConnection) -> Vec<TcpSegment> {
        connection.segments_out().drain(..).collect()
    }

    fn segment(header: TcpHeader, payload: &[u8]) -> TcpSegment {
        TcpSegment::new(header, payload.to_vec())
    }

    fn established() -> TcpConnection {
        let mut connection = TcpConnection::new(config());
        connection.connect();
        drain(&mut connection);

        connection.segment_received(&segment(
            TcpHeader {
                seqno: PEER_ISN,
                ackno: ISN + 1,
                syn: true,
                ack: true,
                win: 4096,
                ..TcpHeader::default()
            },
            b"",
        ));
        drain(&mut connection);

        connection
    }

    #[test]
    fn test_new_connection_is_listening() {
        let connection = TcpConnection::new(config());

        assert_eq!(connection.active(), true);
        assert_eq!(connection.state(), TcpState::Listen);
        assert_eq!(connection.bytes_in_flight(), 0);
    }

    #[test]
    fn test_connect_sends_syn() {
        let mut connection = TcpConnection::new(config());

        connection.connect();

        let segments = drain(&mut connection);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].header.syn, true);
        assert_eq!(segments[0].header.ack, false);
        assert_eq!(segments[0].header.seqno, ISN);
        assert_eq!(connection.state(), TcpState::SynSent);

        connection.connect();
        assert_eq!(drain(&mut connection).len(), 0);
    }

    #[test]
    fn test_passive_open_replies_with_syn_ack() {
        let mut connection = TcpConnection::new(config());

        connection.segment_received(&segment(
            TcpHeader {
                seqno: PEER_ISN,
                syn: true,
                win: 4096,
                ..TcpHeader::default()
            },
            b"",
        ));

        let segments = drain(&mut connection);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].header.syn, true);
        assert_eq!(segments[0].header.ack, true);
        assert_eq!(segments[0].header.ackno, PEER_ISN + 1);
        assert_eq!(connection.state(), TcpState::SynReceived);
    }

    #[test]
    fn test_non_syn_segment_ignored_while_listening() {
        let mut connection = TcpConnection::new(config());

        connection.segment_received(&segment(
            TcpHeader {
                seqno: PEER_ISN,
                ..TcpHeader::default()
            },
            b"stray",
        ));

        assert_eq!(drain(&mut connection).len(), 0);
        assert_eq!(connection.state(), TcpState::Listen);
    }

    #[test]
    fn test_established_after_syn_ack() {
        let connection = established();

        assert_eq!(connection.state(), TcpState::Established);
        assert_eq!(connection.active(), true);
    }

    #[test]
    fn test_data_is_acknowledged() {
        let mut connection = established();

        connection.segment_received(&segment(
            TcpHeader {
                seqno: PEER_ISN + 1,
                ackno: ISN + 1,
                ack: true,
                win: 4096,
                ..TcpHeader::default()
            },
            b"hi",
        ));

        let segments = drain(&mut connection);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].header.ackno, PEER_ISN + 3);
        assert_eq!(segments[0].length_in_sequence_space(), 0);
        assert_eq!(connection.inbound_stream_mut().read(2), b"hi".to_vec());
    }

    #[test]
    fn test_ack_only_segment_is_not_acknowledged() {
        let mut connection = established();

        connection.segment_received(&segment(
            TcpHeader {
                seqno: PEER_ISN + 1,
                ackno: ISN + 1,
                ack: true,
                win: 4096,
                ..TcpHeader::default()
            },
            b"",
        ));

        assert_eq!(drain(&mut connection).len(), 0);
    }

    #[test]
    fn test_window_is_clamped() {
        let mut connection = TcpConnection::new(config().with_recv_capacity(100_000));

        connection.connect();

        let segments = drain(&mut connection);
        assert_eq!(segments[0].header.win, u16::MAX);
    }

    #[test]
    fn test_rst_resets_connection() {
        let mut connection = established();

        connection.segment_received(&segment(
            TcpHeader {
                seqno: PEER_ISN + 1,
                rst: true,
                ..TcpHeader::default()
            },
            b"",
        ));

        assert_eq!(connection.active(), false);
        assert_eq!(connection.state(), TcpState::Reset);
        assert_eq!(connection.inbound_stream().error(), true);
        assert_eq!(connection.outbound_stream().error(), true);
        assert_eq!(drain(&mut connection).len(), 0);
    }

    #[test]
    fn test_too_many_retransmissions_sends_rst() {
        let mut connection = established();

        connection.write(b"abc");
        drain(&mut connection);

        let mut rto = 100;
        for _ in 0..3 {
            connection.tick(rto);
            let segments = drain(&mut connection);
            assert_eq!(segments.len(), 1);
            assert_eq!(segments[0].payload, b"abc".to_vec());
            rto *= 2;
        }

        connection.tick(rto);

        let segments = drain(&mut connection);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].header.rst, true);
        assert_eq!(connection.active(), false);
        assert_eq!(connection.state(), TcpState::Reset);

        connection.tick(10_000);
        assert_eq!(drain(&mut connection).len(), 0);
    }

    #[test]
    fn test_abort_sends_rst() {
        let mut connection = established();

        connection.abort();

        let segments = drain(&mut connection);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].header.rst, true);
        assert_eq!(segments[0].header.seqno, ISN + 1);
        assert_eq!(connection.active(), false);
    }

    #[test]
    fn test_time_since_last_segment_received() {
        let mut connection = established();

        connection.tick(30);
        connection.tick(20);
        assert_eq!(connection.time_since_last_segment_received(), 50);

        connection.segment_received(&segment(
            TcpHeader {
                seqno: PEER_ISN + 1,
                ackno: ISN + 1,
                ack: true,
                win: 4096,
                ..TcpHeader::default()
            },
            b"",
        ));
        assert_eq!(connection.time_since_last_segment_received(), 0);
    }

    #[test]
    fn test_with_rng_picks_isn_from_rng() {
        use rand::rngs::StdRng;
        use rand::SeedableRng;

        let expected = StdRng::seed_from_u64(7).gen::<u32>();
        let mut connection =
            TcpConnection::with_rng(TcpConfig::default(), &mut StdRng::seed_from_u64(7));

        connection.connect();

        let segments = drain(&mut connection);
        assert_eq!(segments[0].header.seqno, SequenceNumber(expected));
    }

    #[test]
    fn test_close_established_connection_yields_rst() {
        let mut connection = established();
        connection.write(b"abcdef");
        drain(&mut connection);

        let segments = connection.close().into_iter().collect::<Vec<_>>();

        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].header.rst, true);
        assert_eq!(segments[0].header.seqno, ISN + 7);
    }

    #[test]
    fn test_close_finished_connection_yields_nothing() {
        let mut connection = established();
        connection.abort();
        drain(&mut connection);

        assert_eq!(connection.close().len(), 0);
    }

    #[test]
    fn test_rst_ignored_while_listening() {
        let mut connection = TcpConnection::new(config());

        connection.segment_received(&segment(
            TcpHeader {
                seqno: PEER_ISN,
                rst: true,
                ..TcpHeader::default()
            },
            b"",
        ));

        assert_eq!(connection.active(), true);
        assert_eq!(connection.state(), TcpState::Listen);
        assert_eq!(connection.inbound_stream().error(), false);
        assert_eq!(drain(&mut connection).len(), 0);
    }

    #[test]
    fn test_segments_ignored_once_inactive() {
        let mut connection = established();
        connection.abort();
        drain(&mut connection);

        connection.segment_received(&segment(
            TcpHeader {
                seqno: PEER_ISN + 1,
                ackno: ISN + 1,
                ack: true,
                win: 4096,
                ..TcpHeader::default()
            },
            b"late",
        ));
        connection.tick(1000);

        assert_eq!(drain(&mut connection).len(), 0);
        assert_eq!(connection.state(), TcpState::Reset);
        assert_eq!(connection.unassembled_bytes(), 0);
        assert_eq!(connection.time_since_last_segment_received(), 0);
    }

    #[test]
    fn test_ack_beyond_next_seqno_ignored() {
        let mut connection = established();

        connection.write(b"abc");
        drain(&mut connection);

        // Acknowledges bytes never sent and advertises a zero window
        connection.segment_received(&segment(
            TcpHeader {
                seqno: PEER_ISN + 1,
                ackno: ISN + 10,
                ack: true,
                win: 0,
                ..TcpHeader::default()
            },
            b"",
        ));

        assert_eq!(connection.bytes_in_flight(), 3);
        assert_eq!(drain(&mut connection).len(), 0);

        // The earlier window of 4096 still applies
        connection.write(b"defg");

        let segments = drain(&mut connection);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].payload, b"defg".to_vec());
        assert_eq!(connection.bytes_in_flight(), 7);
    }
}
