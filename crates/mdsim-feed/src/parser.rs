//! Incremental frame parser with per-symbol gap detection.
//!
//! [`Parser::parse`] looks at the front of a byte slice and reports one of:
//!
//! | Outcome      | Consumed        | Meaning                                  |
//! |--------------|-----------------|------------------------------------------|
//! | `Ok`         | `FRAME_SIZE`    | one decoded message                      |
//! | `Incomplete` | `0`             | fewer than `FRAME_SIZE` bytes available  |
//! | `Malformed`  | `FRAME_SIZE`    | frame failed validation, skip it         |
//!
//! Sequence tracking never rejects a frame. A gap is flagged when a symbol
//! that was already seen arrives with anything other than `last + 1`.

use mdsim_core::{
    error::DecodeError,
    protocol::{FRAME_SIZE, MAX_SYMBOL_ID, MarketMessage},
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParseOutcome {
    Ok(MarketMessage),
    Incomplete,
    Malformed(DecodeError),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParseResult {
    pub outcome: ParseOutcome,
    pub consumed: usize,
    /// The decoded sequence did not follow the previous one for its symbol.
    pub sequence_gap: bool,
}

impl ParseResult {
    const INCOMPLETE: ParseResult =
        ParseResult { outcome: ParseOutcome::Incomplete, consumed: 0, sequence_gap: false };
}

pub struct Parser {
    /// Last sequence per symbol id; 0 = not seen yet.
    last_sequence: Box<[u64]>,
    gaps: u64,
}

impl Parser {
    pub fn new() -> Self {
        Self { last_sequence: vec![0u64; MAX_SYMBOL_ID as usize + 1].into_boxed_slice(), gaps: 0 }
    }

    /// Parse the frame at the front of `buf`.
    pub fn parse(&mut self, buf: &[u8]) -> ParseResult {
        if buf.len() < FRAME_SIZE {
            return ParseResult::INCOMPLETE;
        }

        match MarketMessage::decode(&buf[..FRAME_SIZE]) {
            Ok(msg) => {
                let sequence_gap = self.track_sequence(&msg);
                ParseResult { outcome: ParseOutcome::Ok(msg), consumed: FRAME_SIZE, sequence_gap }
            }
            Err(e) => ParseResult {
                outcome: ParseOutcome::Malformed(e),
                consumed: FRAME_SIZE,
                sequence_gap: false,
            },
        }
    }

    /// Iterate over every complete frame in `buf`, stopping at the first
    /// incomplete one.
    pub fn frames<'p, 'b>(&'p mut self, buf: &'b [u8]) -> Frames<'p, 'b> {
        Frames { parser: self, buf, consumed: 0 }
    }

    fn track_sequence(&mut self, msg: &MarketMessage) -> bool {
        let Some(last) = self.last_sequence.get_mut(msg.symbol_id as usize) else {
            return false;
        };
        let gap = *last != 0 && msg.sequence != last.wrapping_add(1);
        *last = msg.sequence;
        if gap {
            self.gaps += 1;
        }
        gap
    }

    /// Sequence gaps seen so far.
    #[inline]
    pub fn gaps(&self) -> u64 {
        self.gaps
    }

    pub fn last_sequence(&self, symbol_id: u16) -> Option<u64> {
        self.last_sequence.get(symbol_id as usize).copied().filter(|&s| s != 0)
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

/// Lazy sequence of parse results over one buffer snapshot.
pub struct Frames<'p, 'b> {
    parser: &'p mut Parser,
    buf: &'b [u8],
    consumed: usize,
}

impl Frames<'_, '_> {
    /// Total bytes covered by the results yielded so far.
    #[inline]
    pub fn consumed(&self) -> usize {
        self.consumed
    }
}

impl Iterator for Frames<'_, '_> {
    type Item = ParseResult;

    fn next(&mut self) -> Option<ParseResult> {
        let result = self.parser.parse(&self.buf[self.consumed..]);
        if result.outcome == ParseOutcome::Incomplete {
            return None;
        }
        self.consumed += result.consumed;
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdsim_core::protocol::{Payload, Quote, Trade};

    fn quote(symbol_id: u16, sequence: u64) -> MarketMessage {
        MarketMessage {
            symbol_id,
            sequence,
            timestamp_ns: 1_000 + sequence,
            payload: Payload::Quote(Quote {
                bid_price: 99.5,
                ask_price: 100.5,
                bid_qty: 10,
                ask_qty: 20,
            }),
        }
    }

    fn stream(msgs: &[MarketMessage]) -> Vec<u8> {
        msgs.iter().flat_map(|m| m.encode()).collect()
    }

    #[test]
    fn one_byte_short_is_incomplete() {
        let mut p = Parser::new();
        let bytes = quote(1, 1).encode();
        let r = p.parse(&bytes[..FRAME_SIZE - 1]);
        assert_eq!(r.outcome, ParseOutcome::Incomplete);
        assert_eq!(r.consumed, 0);
        assert!(p.parse(&[]).outcome == ParseOutcome::Incomplete);
    }

    #[test]
    fn full_frame_then_partial() {
        let mut p = Parser::new();
        let mut bytes = stream(&[quote(7, 1), quote(7, 2)]);
        bytes.truncate(2 * FRAME_SIZE - 1);

        let first = p.parse(&bytes);
        assert_eq!(first.outcome, ParseOutcome::Ok(quote(7, 1)));
        assert_eq!(first.consumed, FRAME_SIZE);

        let second = p.parse(&bytes[first.consumed..]);
        assert_eq!(second.outcome, ParseOutcome::Incomplete);
        assert_eq!(first.consumed + second.consumed, FRAME_SIZE);
    }

    #[test]
    fn frames_iterator_stops_at_partial_frame() {
        let mut p = Parser::new();
        let mut bytes = stream(&[quote(1, 1), quote(2, 1), quote(1, 2)]);
        bytes.extend_from_slice(&[0u8; 10]);

        let mut frames = p.frames(&bytes);
        let decoded: Vec<_> = frames.by_ref().collect();
        assert_eq!(decoded.len(), 3);
        assert_eq!(frames.consumed(), 3 * FRAME_SIZE);
    }

    #[test]
    fn sequence_gap_counted_once() {
        let mut p = Parser::new();
        let bytes = stream(&[quote(3, 1), quote(3, 2), quote(3, 4)]);
        let gaps: Vec<bool> = p.frames(&bytes).map(|r| r.sequence_gap).collect();
        assert_eq!(gaps, vec![false, false, true]);
        assert_eq!(p.gaps(), 1);
        assert_eq!(p.last_sequence(3), Some(4));
    }

    #[test]
    fn gaps_are_per_symbol() {
        let mut p = Parser::new();
        // Interleaved symbols each count from 1; a late joiner starting at 50
        // is not a gap.
        let bytes = stream(&[
            quote(1, 1),
            quote(2, 1),
            quote(1, 2),
            quote(9, 50),
            quote(2, 2),
            quote(9, 51),
        ]);
        assert_eq!(p.frames(&bytes).count(), 6);
        assert_eq!(p.gaps(), 0);
        assert_eq!(p.last_sequence(4), None);
    }

    #[test]
    fn malformed_frame_consumes_one_frame_and_resyncs() {
        let mut p = Parser::new();
        let mut bytes = stream(&[quote(1, 1)]);
        let mut bad = quote(1, 2).encode();
        bad[0] = 0x00;
        bad[1] = 0x09;
        bytes.extend_from_slice(&bad);
        let trade = MarketMessage {
            symbol_id: 1,
            sequence: 3,
            timestamp_ns: 5,
            payload: Payload::Trade(Trade { price: 100.0, qty: 50, aggressor_buy: true }),
        };
        bytes.extend_from_slice(&trade.encode());

        let results: Vec<_> = p.frames(&bytes).collect();
        assert_eq!(results.len(), 3);
        assert_eq!(results[1].outcome, ParseOutcome::Malformed(DecodeError::UnknownKind(9)));
        assert_eq!(results[1].consumed, FRAME_SIZE);
        assert_eq!(results[2].outcome, ParseOutcome::Ok(trade));
        // 1 then 3: the dropped frame shows up as a gap.
        assert!(results[2].sequence_gap);
    }
}
