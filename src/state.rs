use std::fmt::Display;

/// The outbound half of a connection.
#[derive(Debug, PartialEq, Copy, Clone)]
pub enum SenderState {
    /// Waiting for the stream to begin, no SYN sent
    Closed,
    SynSent,
    /// The SYN has been acknowledged, the stream is open
    SynAcked,
    /// The outbound stream has ended and the FIN is in flight
    FinSent,
    FinAcked,
    Error,
}

impl SenderState {
    pub(crate) fn can_transition_to(self, next: SenderState) -> bool {
        use SenderState::*;

        match (self, next) {
            (_, Error) => true,
            (Closed, SynSent) => true,
            (SynSent, SynAcked) => true,
            (SynAcked, FinSent) => true,
            (FinSent, FinAcked) => true,
            _ => false,
        }
    }

    pub fn fin_sent(self) -> bool {
        self == SenderState::FinSent || self == SenderState::FinAcked
    }
}

/// The inbound half of a connection.
#[derive(Debug, PartialEq, Copy, Clone)]
pub enum ReceiverState {
    /// Waiting for the SYN
    Listen,
    SynReceived,
    /// The peer's FIN has been received and the inbound stream fully reassembled
    FinReceived,
    Error,
}

/// A summary of the whole connection in the familiar TCP vocabulary.
#[derive(Debug, PartialEq, Copy, Clone)]
pub enum TcpState {
    Listen,
    SynSent,
    SynReceived,
    Established,
    CloseWait,
    LastAck,
    FinWait1,
    FinWait2,
    Closing,
    TimeWait,
    Closed,
    Reset,
}

impl TcpState {
    /// Derives the connection state from its components.
    ///
    /// Neither component records which side sent its FIN first, so `linger`
    /// stands in for it: a connection still lingering closed actively.
    pub fn summarise(
        receiver: ReceiverState,
        sender: SenderState,
        active: bool,
        linger: bool,
    ) -> Self {
        use ReceiverState as R;
        use SenderState as S;

        if receiver == R::Error || sender == S::Error {
            return TcpState::Reset;
        }

        match (receiver, sender) {
            (R::FinReceived, S::FinAcked) if active => TcpState::TimeWait,
            _ if !active => TcpState::Closed,
            (R::Listen, S::Closed) => TcpState::Listen,
            (R::Listen, _) => TcpState::SynSent,
            (R::SynReceived, S::Closed) | (R::SynReceived, S::SynSent) => TcpState::SynReceived,
            (R::SynReceived, S::SynAcked) => TcpState::Established,
            (R::SynReceived, S::FinSent) => TcpState::FinWait1,
            (R::SynReceived, S::FinAcked) => TcpState::FinWait2,
            (R::FinReceived, S::Closed) | (R::FinReceived, S::SynSent) => TcpState::SynReceived,
            (R::FinReceived, S::SynAcked) => TcpState::CloseWait,
            (R::FinReceived, S::FinSent) if linger => TcpState::Closing,
            (R::FinReceived, S::FinSent) => TcpState::LastAck,
            (R::FinReceived, S::FinAcked) => TcpState::Closed,
            (R::Error, _) | (_, S::Error) => TcpState::Reset,
        }
    }
}

impl Display for TcpState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TcpState::Listen => "LISTEN",
            TcpState::SynSent => "SYN_SENT",
            TcpState::SynReceived => "SYN_RCVD",
            TcpState::Established => "ESTABLISHED",
            TcpState::CloseWait => "CLOSE_WAIT",
            TcpState::LastAck => "LAST_ACK",
            TcpState::FinWait1 => "FIN_WAIT_1",
            TcpState::FinWait2 => "FIN_WAIT_2",
            TcpState::Closing => "CLOSING",
            TcpState::TimeWait => "TIME_WAIT",
            TcpState::Closed => "CLOSED",
            TcpState::Reset => "RESET",
        };

        write!(f, "{}", name)
    }
}
