//! RUDP wire types, constants, and sequence arithmetic

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// RUDP protocol constants
pub mod constants {
    /// Protocol version carried in every header.
    pub const RUDP_VERSION: u16 = 1;
    /// Number of payload bytes that fit in one packet, header not included.
    pub const RUDP_MAX_PAYLOAD: usize = 1000;
    /// Encoded header size in bytes.
    pub const RUDP_HEADER_SIZE: usize = 8;
    /// Default max number of retransmissions of any one packet.
    pub const RUDP_MAX_RETRANS: u32 = 5;
    /// Default retransmission timeout in milliseconds.
    pub const RUDP_TIMEOUT_MS: u64 = 2000;
    /// Default max number of unacknowledged packets in flight per peer.
    pub const RUDP_WINDOW: usize = 3;
}

/// Sequence number type
pub type SeqNum = u32;

// Sequence numbers are 32-bit integers compared with modular arithmetic.
// The difference is truncated to i16 on purpose: that 16-bit comparison
// window is the wire contract shared with existing peers.

/// `true` when `a` precedes `b` in sequence space.
#[inline]
pub fn seq_lt(a: SeqNum, b: SeqNum) -> bool {
    (a.wrapping_sub(b) as i16) < 0
}

/// `true` when `a` precedes or equals `b` in sequence space.
#[inline]
pub fn seq_leq(a: SeqNum, b: SeqNum) -> bool {
    (a.wrapping_sub(b) as i16) <= 0
}

/// `true` when `a` follows `b` in sequence space.
#[inline]
pub fn seq_gt(a: SeqNum, b: SeqNum) -> bool {
    (a.wrapping_sub(b) as i16) > 0
}

/// `true` when `a` follows or equals `b` in sequence space.
#[inline]
pub fn seq_geq(a: SeqNum, b: SeqNum) -> bool {
    (a.wrapping_sub(b) as i16) >= 0
}

/// The four RUDP packet types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum PacketType {
    Data = 1,
    Ack = 2,
    Syn = 4,
    Fin = 5,
}

impl PacketType {
    /// Classify a raw wire value. Unknown values yield `None` and are
    /// dropped by the dispatcher rather than rejected by the decoder.
    pub fn from_u16(raw: u16) -> Option<Self> {
        match raw {
            1 => Some(PacketType::Data),
            2 => Some(PacketType::Ack),
            4 => Some(PacketType::Syn),
            5 => Some(PacketType::Fin),
            _ => None,
        }
    }

    /// Get packet type as string for debugging
    pub fn as_str(self) -> &'static str {
        match self {
            PacketType::Data => "DATA",
            PacketType::Ack => "ACK",
            PacketType::Syn => "SYN",
            PacketType::Fin => "FIN",
        }
    }
}

/// RUDP packet header structure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RudpHeader {
    pub version: u16,
    pub ptype: u16,
    pub seqno: SeqNum,
}

impl RudpHeader {
    /// Size of the RUDP header in bytes
    pub const SIZE: usize = constants::RUDP_HEADER_SIZE;

    /// Create a new header for the given packet type
    pub fn new(ptype: PacketType, seqno: SeqNum) -> Self {
        Self {
            version: constants::RUDP_VERSION,
            ptype: ptype as u16,
            seqno,
        }
    }

    /// Encode header into buffer in network byte order
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(self.version);
        buf.put_u16(self.ptype);
        buf.put_u32(self.seqno);
    }

    /// Decode a header, rejecting short buffers and version mismatches.
    pub fn decode(buf: &mut Bytes) -> Option<Self> {
        if buf.len() < Self::SIZE {
            return None;
        }

        let version = buf.get_u16();
        if version != constants::RUDP_VERSION {
            return None;
        }

        Some(Self {
            version,
            ptype: buf.get_u16(),
            seqno: buf.get_u32(),
        })
    }

    /// Get packet type as string for debugging
    pub fn type_str(&self) -> &'static str {
        match PacketType::from_u16(self.ptype) {
            Some(t) => t.as_str(),
            None => "BAD",
        }
    }
}

/// RUDP packet containing header and opaque payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RudpPacket {
    pub header: RudpHeader,
    pub payload: Bytes,
}

impl RudpPacket {
    /// Create a new packet
    pub fn new(ptype: PacketType, seqno: SeqNum, payload: Bytes) -> Self {
        debug_assert!(payload.len() <= constants::RUDP_MAX_PAYLOAD);
        Self {
            header: RudpHeader::new(ptype, seqno),
            payload,
        }
    }

    /// Create a SYN packet
    pub fn syn(seqno: SeqNum) -> Self {
        Self::new(PacketType::Syn, seqno, Bytes::new())
    }

    /// Create an ACK packet
    pub fn ack(seqno: SeqNum) -> Self {
        Self::new(PacketType::Ack, seqno, Bytes::new())
    }

    /// Create a DATA packet
    pub fn data(seqno: SeqNum, payload: Bytes) -> Self {
        Self::new(PacketType::Data, seqno, payload)
    }

    /// Create a FIN packet
    pub fn fin(seqno: SeqNum) -> Self {
        Self::new(PacketType::Fin, seqno, Bytes::new())
    }

    /// Encode packet into buffer
    pub fn encode(&self, buf: &mut BytesMut) {
        self.header.encode(buf);
        buf.extend_from_slice(&self.payload);
    }

    /// Encode into a fresh wire buffer
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.size());
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Decode one datagram. The payload length is the datagram length minus
    /// the header; there is no length field on the wire.
    pub fn decode(datagram: &[u8]) -> Option<Self> {
        if datagram.len() > RudpHeader::SIZE + constants::RUDP_MAX_PAYLOAD {
            return None;
        }

        let mut buf = Bytes::copy_from_slice(datagram);
        let header = RudpHeader::decode(&mut buf)?;

        Some(Self {
            header,
            payload: buf,
        })
    }

    /// Get total packet size on the wire
    pub fn size(&self) -> usize {
        RudpHeader::SIZE + self.payload.len()
    }

    /// Classify the packet; `None` for unknown wire types.
    pub fn packet_type(&self) -> Option<PacketType> {
        PacketType::from_u16(self.header.ptype)
    }

    /// Check if this is an ACK packet
    pub fn is_ack(&self) -> bool {
        self.header.ptype == PacketType::Ack as u16
    }
}
