//! Binary wire protocol shared by the exchange simulator and the feed handler.
//!
//! Every market data message travels as one fixed-size frame, whatever its
//! kind, so a receiver can split the byte stream without a length prefix.
//!
//! # Frame layout (44 bytes)
//!
//! | Offset | Size | Field          | Encoding                         |
//! |--------|------|----------------|----------------------------------|
//! | 0      | 2    | kind           | u16, network order (1=TRADE, 2=QUOTE) |
//! | 2      | 2    | symbol_id      | u16, network order               |
//! | 4      | 8    | sequence       | u64, network order               |
//! | 12     | 8    | timestamp_ns   | u64, network order               |
//! | 20     | 24   | payload        | see below                        |
//!
//! QUOTE payload: `bid_price` f64, `ask_price` f64, `bid_qty` u32, `ask_qty` u32.
//! TRADE payload: `price` f64, `qty` u32, `aggressor_buy` u8, 11 bytes of zero
//! padding.
//!
//! Integer payload fields are network order. `f64` fields are written in
//! **host** byte order: the deployment is assumed to be uniform-endian, and no
//! negotiation takes place.
//!
//! # Subscription request
//!
//! Sent once by the client right after connecting:
//! `0xFF` (1) · `count` (u16, network order) · `symbol_id[count]` (u16 each).

use crate::error::DecodeError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Smallest valid symbol id.
pub const MIN_SYMBOL_ID: u16 = 1;
/// Largest valid symbol id.
pub const MAX_SYMBOL_ID: u16 = 500;

/// Size of the fixed header in bytes.
pub const HEADER_SIZE: usize = 20;
/// Size of the payload area in bytes (the larger of the two shapes).
pub const PAYLOAD_SIZE: usize = 24;
/// Total frame size, identical for every message kind.
pub const FRAME_SIZE: usize = HEADER_SIZE + PAYLOAD_SIZE;

/// Command tag of the subscription request.
pub const SUBSCRIBE_TAG: u8 = 0xFF;

/// Returns `true` if `id` lies in `MIN_SYMBOL_ID..=MAX_SYMBOL_ID`.
#[inline]
pub fn is_valid_symbol(id: u16) -> bool {
    (MIN_SYMBOL_ID..=MAX_SYMBOL_ID).contains(&id)
}

// ---------------------------------------------------------------------------
// Message kinds and payloads
// ---------------------------------------------------------------------------

/// Discriminant transmitted in the first two bytes of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageKind {
    Trade = 0x0001,
    Quote = 0x0002,
}

impl MessageKind {
    /// Map a wire tag back to a kind.
    #[inline]
    pub fn from_wire(tag: u16) -> Option<Self> {
        match tag {
            0x0001 => Some(Self::Trade),
            0x0002 => Some(Self::Quote),
            _ => None,
        }
    }
}

/// Two-sided quote payload.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Quote {
    pub bid_price: f64,
    pub ask_price: f64,
    pub bid_qty: u32,
    pub ask_qty: u32,
}

/// Trade print payload.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Trade {
    pub price: f64,
    pub qty: u32,
    /// `true` if the buyer crossed the spread (trade printed at the ask).
    pub aggressor_buy: bool,
}

/// Payload selected by the message kind. Exactly one shape is live.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Payload {
    Quote(Quote),
    Trade(Trade),
}

impl Payload {
    #[inline]
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Quote(_) => MessageKind::Quote,
            Self::Trade(_) => MessageKind::Trade,
        }
    }
}

// ---------------------------------------------------------------------------
// MarketMessage
// ---------------------------------------------------------------------------

/// The canonical market data record, both on the wire and after decoding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarketMessage {
    pub symbol_id: u16,
    /// Per-symbol sequence number assigned by the exchange, starting at 1.
    pub sequence: u64,
    /// Nanoseconds since an arbitrary monotonic epoch on the exchange host.
    pub timestamp_ns: u64,
    pub payload: Payload,
}

impl Default for MarketMessage {
    fn default() -> Self {
        Self {
            symbol_id: 0,
            sequence: 0,
            timestamp_ns: 0,
            payload: Payload::Quote(Quote::default()),
        }
    }
}

impl MarketMessage {
    #[inline]
    pub fn kind(&self) -> MessageKind {
        self.payload.kind()
    }

    /// Price a consumer would display for this message: the mid for a quote,
    /// the execution price for a trade.
    #[inline]
    pub fn reference_price(&self) -> f64 {
        match self.payload {
            Payload::Quote(q) => (q.bid_price + q.ask_price) * 0.5,
            Payload::Trade(t) => t.price,
        }
    }

    /// Serialize into a caller-supplied frame buffer.
    ///
    /// Unused payload bytes are zeroed so frames are byte-for-byte
    /// deterministic.
    pub fn encode_into(&self, frame: &mut [u8; FRAME_SIZE]) {
        frame[0..2].copy_from_slice(&(self.kind() as u16).to_be_bytes());
        frame[2..4].copy_from_slice(&self.symbol_id.to_be_bytes());
        frame[4..12].copy_from_slice(&self.sequence.to_be_bytes());
        frame[12..20].copy_from_slice(&self.timestamp_ns.to_be_bytes());

        let payload = &mut frame[HEADER_SIZE..];
        payload.fill(0);
        match self.payload {
            Payload::Quote(q) => {
                payload[0..8].copy_from_slice(&q.bid_price.to_ne_bytes());
                payload[8..16].copy_from_slice(&q.ask_price.to_ne_bytes());
                payload[16..20].copy_from_slice(&q.bid_qty.to_be_bytes());
                payload[20..24].copy_from_slice(&q.ask_qty.to_be_bytes());
            }
            Payload::Trade(t) => {
                payload[0..8].copy_from_slice(&t.price.to_ne_bytes());
                payload[8..12].copy_from_slice(&t.qty.to_be_bytes());
                payload[12] = t.aggressor_buy as u8;
            }
        }
    }

    /// Serialize into a fresh frame.
    #[inline]
    pub fn encode(&self) -> [u8; FRAME_SIZE] {
        let mut frame = [0u8; FRAME_SIZE];
        self.encode_into(&mut frame);
        frame
    }

    /// Decode one frame from the front of `data`.
    ///
    /// Header integers are converted from network order. Bytes beyond
    /// `FRAME_SIZE` are ignored; bytes of the inactive payload shape are never
    /// read.
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < FRAME_SIZE {
            return Err(DecodeError::Truncated(data.len()));
        }

        let tag = read_u16_be(data, 0);
        let kind = MessageKind::from_wire(tag).ok_or(DecodeError::UnknownKind(tag))?;
        let symbol_id = read_u16_be(data, 2);
        if !is_valid_symbol(symbol_id) {
            return Err(DecodeError::SymbolOutOfRange(symbol_id));
        }
        let sequence = read_u64_be(data, 4);
        let timestamp_ns = read_u64_be(data, 12);

        let p = &data[HEADER_SIZE..FRAME_SIZE];
        let payload = match kind {
            MessageKind::Quote => Payload::Quote(Quote {
                bid_price: read_f64_ne(p, 0),
                ask_price: read_f64_ne(p, 8),
                bid_qty: read_u32_be(p, 16),
                ask_qty: read_u32_be(p, 20),
            }),
            MessageKind::Trade => Payload::Trade(Trade {
                price: read_f64_ne(p, 0),
                qty: read_u32_be(p, 8),
                aggressor_buy: p[12] != 0,
            }),
        };

        Ok(Self { symbol_id, sequence, timestamp_ns, payload })
    }
}

impl std::fmt::Display for MarketMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.payload {
            Payload::Quote(q) => write!(
                f,
                "Quote(sym={} seq={} bid={:.4}x{} ask={:.4}x{})",
                self.symbol_id, self.sequence, q.bid_price, q.bid_qty, q.ask_price, q.ask_qty
            ),
            Payload::Trade(t) => {
                let side = if t.aggressor_buy { "BUY" } else { "SELL" };
                write!(
                    f,
                    "Trade(sym={} seq={} {side} {:.4}x{})",
                    self.symbol_id, self.sequence, t.price, t.qty
                )
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Subscription request
// ---------------------------------------------------------------------------

/// Client-to-exchange subscription handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRequest {
    pub symbols: Vec<u16>,
}

impl SubscriptionRequest {
    pub fn new(symbols: Vec<u16>) -> Self {
        Self { symbols }
    }

    /// Subscribe to every id in `first..=last`.
    pub fn range(first: u16, last: u16) -> Self {
        Self { symbols: (first..=last).collect() }
    }

    /// Encoded length in bytes.
    #[inline]
    pub fn encoded_len(&self) -> usize {
        3 + self.symbols.len() * 2
    }

    /// Serialize to `0xFF · count · ids…`, all integers network order.
    ///
    /// At most `u16::MAX` ids are encoded; the count always matches the ids
    /// actually written.
    pub fn encode(&self) -> Vec<u8> {
        let ids = &self.symbols[..self.symbols.len().min(u16::MAX as usize)];
        let mut buf = Vec::with_capacity(3 + ids.len() * 2);
        buf.push(SUBSCRIBE_TAG);
        buf.extend_from_slice(&(ids.len() as u16).to_be_bytes());
        for id in ids {
            buf.extend_from_slice(&id.to_be_bytes());
        }
        buf
    }

    /// Decode a request from the front of `data`.
    ///
    /// Returns `Ok(None)` while the request is still incomplete, otherwise the
    /// request together with the number of bytes it occupied.
    pub fn decode(data: &[u8]) -> Result<Option<(Self, usize)>, DecodeError> {
        let Some(&tag) = data.first() else {
            return Ok(None);
        };
        if tag != SUBSCRIBE_TAG {
            return Err(DecodeError::BadCommand(tag));
        }
        if data.len() < 3 {
            return Ok(None);
        }
        let count = read_u16_be(data, 1) as usize;
        let total = 3 + count * 2;
        if data.len() < total {
            return Ok(None);
        }
        let symbols = (0..count).map(|i| read_u16_be(data, 3 + i * 2)).collect();
        Ok(Some((Self { symbols }, total)))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Exclusive-or of all bytes. An optional integrity aid; the frame format
/// itself does not carry a checksum.
#[inline]
pub fn checksum_xor(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc ^ b)
}

#[inline]
fn read_u16_be(data: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([data[offset], data[offset + 1]])
}

#[inline]
fn read_u32_be(data: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes(data[offset..offset + 4].try_into().unwrap_or([0; 4]))
}

#[inline]
fn read_u64_be(data: &[u8], offset: usize) -> u64 {
    u64::from_be_bytes(data[offset..offset + 8].try_into().unwrap_or([0; 8]))
}

#[inline]
fn read_f64_ne(data: &[u8], offset: usize) -> f64 {
    f64::from_ne_bytes(data[offset..offset + 8].try_into().unwrap_or([0; 8]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_quote() -> MarketMessage {
        MarketMessage {
            symbol_id: 42,
            sequence: 7,
            timestamp_ns: 1_234_567_890,
            payload: Payload::Quote(Quote {
                bid_price: 99.95,
                ask_price: 100.05,
                bid_qty: 300,
                ask_qty: 450,
            }),
        }
    }

    fn sample_trade() -> MarketMessage {
        MarketMessage {
            symbol_id: 500,
            sequence: u64::MAX - 1,
            timestamp_ns: 55,
            payload: Payload::Trade(Trade { price: 12.5, qty: 1999, aggressor_buy: true }),
        }
    }

    #[test]
    fn quote_round_trip() {
        let msg = sample_quote();
        let frame = msg.encode();
        assert_eq!(frame.len(), FRAME_SIZE);
        assert_eq!(MarketMessage::decode(&frame), Ok(msg));
    }

    #[test]
    fn trade_round_trip() {
        let msg = sample_trade();
        assert_eq!(MarketMessage::decode(&msg.encode()), Ok(msg));
    }

    #[test]
    fn header_is_network_order() {
        let frame = sample_quote().encode();
        assert_eq!(&frame[0..2], &[0x00, 0x02]);
        assert_eq!(&frame[2..4], &[0x00, 42]);
        assert_eq!(&frame[4..12], &[0, 0, 0, 0, 0, 0, 0, 7]);
    }

    #[test]
    fn trade_padding_is_zeroed() {
        let frame = sample_trade().encode();
        assert_eq!(frame[HEADER_SIZE + 12], 1);
        assert!(frame[HEADER_SIZE + 13..].iter().all(|&b| b == 0));
    }

    #[test]
    fn decode_rejects_short_input() {
        let frame = sample_quote().encode();
        assert_eq!(
            MarketMessage::decode(&frame[..FRAME_SIZE - 1]),
            Err(DecodeError::Truncated(FRAME_SIZE - 1))
        );
    }

    #[test]
    fn decode_rejects_unknown_kind() {
        let mut frame = sample_quote().encode();
        frame[0..2].copy_from_slice(&0x0003u16.to_be_bytes());
        assert_eq!(MarketMessage::decode(&frame), Err(DecodeError::UnknownKind(3)));
    }

    #[test]
    fn decode_rejects_symbol_out_of_range() {
        let mut frame = sample_quote().encode();
        frame[2..4].copy_from_slice(&0u16.to_be_bytes());
        assert_eq!(MarketMessage::decode(&frame), Err(DecodeError::SymbolOutOfRange(0)));
        frame[2..4].copy_from_slice(&501u16.to_be_bytes());
        assert_eq!(MarketMessage::decode(&frame), Err(DecodeError::SymbolOutOfRange(501)));
    }

    #[test]
    fn subscription_bytes() {
        let req = SubscriptionRequest::new(vec![1, 2, 3]);
        assert_eq!(req.encode(), vec![0xFF, 0x00, 0x03, 0x00, 0x01, 0x00, 0x02, 0x00, 0x03]);
        assert_eq!(req.encoded_len(), 9);
    }

    #[test]
    fn subscription_decode() {
        let bytes = SubscriptionRequest::range(1, 100).encode();
        assert_eq!(SubscriptionRequest::decode(&bytes[..50]), Ok(None));
        let (req, used) = SubscriptionRequest::decode(&bytes).unwrap().unwrap();
        assert_eq!(used, bytes.len());
        assert_eq!(req.symbols.len(), 100);
        assert_eq!(req.symbols[99], 100);
        assert_eq!(SubscriptionRequest::decode(&[0x01]), Err(DecodeError::BadCommand(0x01)));
    }

    #[test]
    fn checksum() {
        assert_eq!(checksum_xor(&[]), 0);
        assert_eq!(checksum_xor(&[0xF0, 0x0F]), 0xFF);
        assert_eq!(checksum_xor(&[0xAA, 0xAA]), 0);
    }
}
