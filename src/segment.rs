use crate::SequenceNumber;
use byteorder::{BigEndian, ByteOrder, ReadBytesExt};
use std::io::Cursor;
use std::net::Ipv4Addr;
use thiserror::Error;

/// Size of a TCP header without options
pub const TCP_HEADER_SIZE: usize = 20;

const FLAG_FIN: u8 = 0b0000_0001;
const FLAG_SYN: u8 = 0b0000_0010;
const FLAG_RST: u8 = 0b0000_0100;
const FLAG_ACK: u8 = 0b0001_0000;

const IPPROTO_TCP: u8 = 6;

#[derive(Debug, PartialEq, Clone, Default)]
pub struct TcpHeader {
    pub sport: u16,
    pub dport: u16,

    /// The sequence number of the first byte (or of the SYN) carried by the segment
    pub seqno: SequenceNumber,

    /// The next sequence number the sender of this segment expects,
    /// only meaningful when `ack` is set
    pub ackno: SequenceNumber,

    pub ack: bool,
    pub rst: bool,
    pub syn: bool,
    pub fin: bool,

    /// The number of bytes the sender of this segment is willing to accept
    pub win: u16,

    pub cksum: u16,
}

#[derive(Debug, PartialEq, Clone, Default)]
pub struct TcpSegment {
    pub header: TcpHeader,
    pub payload: Vec<u8>,
}

#[derive(Error, Debug, PartialEq)]
pub enum SegmentParseError {
    #[error("received segment is too small: {0}")]
    BufferTooSmall(usize),
    #[error("received segment has invalid data offset {0} for a buffer of {1} bytes")]
    BadDataOffset(u8, usize),
}

impl TcpSegment {
    pub fn new(header: TcpHeader, payload: Vec<u8>) -> Self {
        Self { header, payload }
    }

    pub fn header(&self) -> &TcpHeader {
        &self.header
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload[..]
    }

    /// The number of sequence numbers occupied by the segment.
    /// SYN and FIN each occupy one sequence number in addition to the payload.
    pub fn length_in_sequence_space(&self) -> u64 {
        self.payload.len() as u64 + self.header.syn as u64 + self.header.fin as u64
    }

    pub fn parse(data: &[u8]) -> Result<TcpSegment, SegmentParseError> {
        if data.len() < TCP_HEADER_SIZE {
            return Err(SegmentParseError::BufferTooSmall(data.len()));
        }

        let mut cursor = Cursor::new(data);
        let header = Self::read_header(&mut cursor)
            .map_err(|_| SegmentParseError::BufferTooSmall(data.len()))?;

        let data_offset = data[12] >> 4;
        let header_len = data_offset as usize * 4;

        if header_len < TCP_HEADER_SIZE || header_len > data.len() {
            return Err(SegmentParseError::BadDataOffset(data_offset, data.len()));
        }

        Ok(TcpSegment {
            header,
            payload: data[header_len..].to_vec(),
        })
    }

    fn read_header(cursor: &mut Cursor<&[u8]>) -> std::io::Result<TcpHeader> {
        let sport = cursor.read_u16::<BigEndian>()?;
        let dport = cursor.read_u16::<BigEndian>()?;
        let seqno = SequenceNumber(cursor.read_u32::<BigEndian>()?);
        let ackno = SequenceNumber(cursor.read_u32::<BigEndian>()?);
        let _data_offset = cursor.read_u8()?;
        let flags = cursor.read_u8()?;
        let win = cursor.read_u16::<BigEndian>()?;
        let cksum = cursor.read_u16::<BigEndian>()?;
        let _urgent_pointer = cursor.read_u16::<BigEndian>()?;

        Ok(TcpHeader {
            sport,
            dport,
            seqno,
            ackno,
            ack: flags & FLAG_ACK != 0,
            rst: flags & FLAG_RST != 0,
            syn: flags & FLAG_SYN != 0,
            fin: flags & FLAG_FIN != 0,
            win,
            cksum,
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let header = &self.header;
        let mut flags = 0u8;

        if header.ack {
            flags |= FLAG_ACK;
        }
        if header.rst {
            flags |= FLAG_RST;
        }
        if header.syn {
            flags |= FLAG_SYN;
        }
        if header.fin {
            flags |= FLAG_FIN;
        }

        let mut buff = vec![0u8; TCP_HEADER_SIZE];
        BigEndian::write_u16(&mut buff[0..2], header.sport);
        BigEndian::write_u16(&mut buff[2..4], header.dport);
        BigEndian::write_u32(&mut buff[4..8], header.seqno.0);
        BigEndian::write_u32(&mut buff[8..12], header.ackno.0);
        buff[12] = ((TCP_HEADER_SIZE / 4) as u8) << 4;
        buff[13] = flags;
        BigEndian::write_u16(&mut buff[14..16], header.win);
        BigEndian::write_u16(&mut buff[16..18], header.cksum);
        // Urgent pointer stays zero

        buff.extend_from_slice(&self.payload[..]);

        buff
    }

    /// Computes the TCP checksum over the IPv4 pseudo-header, the header
    /// (with the checksum field zeroed) and the payload.
    pub fn compute_checksum(&self, src: Ipv4Addr, dst: Ipv4Addr) -> u16 {
        let mut segment = self.clone();
        segment.header.cksum = 0;
        let bytes = segment.serialize();

        let mut sum = 0u32;
        sum += ones_complement_sum(&src.octets());
        sum += ones_complement_sum(&dst.octets());
        sum += IPPROTO_TCP as u32;
        sum += bytes.len() as u32;
        sum += ones_complement_sum(&bytes);

        while sum >> 16 != 0 {
            sum = (sum & 0xffff) + (sum >> 16);
        }

        !(sum as u16)
    }

    pub fn with_checksum(mut self, src: Ipv4Addr, dst: Ipv4Addr) -> Self {
        self.header.cksum = self.compute_checksum(src, dst);

        self
    }

    pub fn is_checksum_valid(&self, src: Ipv4Addr, dst: Ipv4Addr) -> bool {
        self.header.cksum == self.compute_checksum(src, dst)
    }
}

fn ones_complement_sum(data: &[u8]) -> u32 {
    let mut sum = 0u32;

    for chunk in data.chunks(2) {
        let word = match chunk {
            [hi, lo] => u16::from_be_bytes([*hi, *lo]),
            [hi] => u16::from_be_bytes([*hi, 0]),
            _ => 0,
        };
        sum += word as u32;

        if sum > 0xffff {
            sum = (sum & 0xffff) + (sum >> 16);
        }
    }

    sum
}
