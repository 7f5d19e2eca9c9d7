/// Streaming record parser
///
/// Decodes the unframed fixed-width record stream across arbitrary chunk
/// boundaries. Whole records are read directly from the driver's buffer;
/// only the bytes of a record that straddles a chunk boundary pass through
/// the carry buffer, so the hot path never allocates.

use crate::record::{Record, Slot};
use crate::ring::SpscRing;
use crate::timing::monotonic_ns;
use thiserror::Error;

/// At most one partial record is ever held between chunks.
pub const CARRY_CAPACITY: usize = Record::SIZE - 1;

/// Observer for parse outcomes, implemented by the stats layer and by the
/// per-feed state. Two small methods instead of overridable stats classes.
pub trait RecordSink {
    /// A record was decoded and accepted by the ring.
    fn on_received(&self, record: &Record);

    /// A record was decoded but the ring was full.
    fn on_dropped(&self);
}

#[derive(Error, Debug, Clone, Copy)]
pub enum ParseError {
    /// A partial record larger than the carry buffer accumulated. This
    /// indicates upstream corruption and is fatal for the feed.
    #[error("partial record of {have} bytes exceeds carry capacity {capacity}")]
    CarryOverflow { have: usize, capacity: usize },
}

pub struct Parser {
    carry: [u8; CARRY_CAPACITY],
    carry_len: usize,
}

impl Parser {
    pub fn new() -> Self {
        Parser { carry: [0u8; CARRY_CAPACITY], carry_len: 0 }
    }

    /// Consume all of `bytes`, emitting every complete record into `ring`
    /// in order. Prefix bytes of an incomplete trailing record are carried
    /// to the next call.
    pub fn feed<S: RecordSink>(
        &mut self,
        mut bytes: &[u8],
        ring: &SpscRing<Slot>,
        sink: &S,
    ) -> Result<(), ParseError> {
        if self.carry_len > 0 {
            let need = Record::SIZE - self.carry_len;
            if bytes.len() < need {
                let total = self.carry_len + bytes.len();
                if total > CARRY_CAPACITY {
                    return Err(ParseError::CarryOverflow { have: total, capacity: CARRY_CAPACITY });
                }
                self.carry[self.carry_len..total].copy_from_slice(bytes);
                self.carry_len = total;
                return Ok(());
            }
            let mut stitched = [0u8; Record::SIZE];
            stitched[..self.carry_len].copy_from_slice(&self.carry[..self.carry_len]);
            stitched[self.carry_len..].copy_from_slice(&bytes[..need]);
            bytes = &bytes[need..];
            self.carry_len = 0;
            self.emit(Record::read_from(&stitched), ring, sink);
        }

        // Whole records decode straight out of the input chunk.
        while bytes.len() >= Record::SIZE {
            self.emit(Record::read_from(&bytes[..Record::SIZE]), ring, sink);
            bytes = &bytes[Record::SIZE..];
        }

        if !bytes.is_empty() {
            self.carry[..bytes.len()].copy_from_slice(bytes);
            self.carry_len = bytes.len();
        }
        Ok(())
    }

    /// Bytes currently held for an incomplete record.
    pub fn pending(&self) -> usize {
        self.carry_len
    }

    pub fn reset(&mut self) {
        self.carry_len = 0;
    }

    #[inline]
    fn emit<S: RecordSink>(&self, record: Record, ring: &SpscRing<Slot>, sink: &S) {
        let slot = Slot::new(record, monotonic_ns());
        if ring.try_push(slot) {
            sink.on_received(&record);
        } else {
            sink.on_dropped();
        }
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[derive(Default)]
    struct CountingSink {
        received: Cell<u64>,
        dropped: Cell<u64>,
    }

    impl RecordSink for CountingSink {
        fn on_received(&self, _record: &Record) {
            self.received.set(self.received.get() + 1);
        }

        fn on_dropped(&self) {
            self.dropped.set(self.dropped.get() + 1);
        }
    }

    fn encode_records(seqs: &[u64]) -> Vec<u8> {
        let mut buf = vec![0u8; seqs.len() * Record::SIZE];
        for (i, seq) in seqs.iter().enumerate() {
            Record::new(*seq, 100.0 + *seq as f64, 1).write_to(&mut buf[i * Record::SIZE..]);
        }
        buf
    }

    #[test]
    fn test_aligned_chunk() {
        let ring = SpscRing::new(16);
        let sink = CountingSink::default();
        let mut parser = Parser::new();

        let bytes = encode_records(&[1, 2, 3]);
        parser.feed(&bytes, &ring, &sink).unwrap();

        assert_eq!(sink.received.get(), 3);
        assert_eq!(parser.pending(), 0);
        for seq in 1..=3u64 {
            assert_eq!(ring.try_pop().unwrap().record.seq(), seq);
        }
    }

    #[test]
    fn test_split_record_across_chunks() {
        let ring = SpscRing::new(16);
        let sink = CountingSink::default();
        let mut parser = Parser::new();

        // Two records delivered as 13 + 13 + 14 bytes
        let bytes = encode_records(&[7, 8]);
        parser.feed(&bytes[..13], &ring, &sink).unwrap();
        assert_eq!(sink.received.get(), 0);
        assert_eq!(parser.pending(), 13);

        parser.feed(&bytes[13..26], &ring, &sink).unwrap();
        assert_eq!(sink.received.get(), 1);

        parser.feed(&bytes[26..], &ring, &sink).unwrap();
        assert_eq!(sink.received.get(), 2);
        assert_eq!(parser.pending(), 0);

        assert_eq!(ring.try_pop().unwrap().record.seq(), 7);
        assert_eq!(ring.try_pop().unwrap().record.seq(), 8);
    }

    #[test]
    fn test_byte_at_a_time() {
        let ring = SpscRing::new(16);
        let sink = CountingSink::default();
        let mut parser = Parser::new();

        let bytes = encode_records(&[1, 2, 3, 4]);
        for b in &bytes {
            parser.feed(std::slice::from_ref(b), &ring, &sink).unwrap();
        }
        assert_eq!(sink.received.get(), 4);
        assert_eq!(parser.pending(), 0);
    }

    #[test]
    fn test_trailing_remainder_carries() {
        let ring = SpscRing::new(16);
        let sink = CountingSink::default();
        let mut parser = Parser::new();

        let bytes = encode_records(&[5, 6]);
        parser.feed(&bytes[..Record::SIZE + 11], &ring, &sink).unwrap();
        assert_eq!(sink.received.get(), 1);
        assert_eq!(parser.pending(), 11);

        parser.feed(&bytes[Record::SIZE + 11..], &ring, &sink).unwrap();
        assert_eq!(sink.received.get(), 2);
        assert_eq!(parser.pending(), 0);
    }

    #[test]
    fn test_ring_full_counts_drop() {
        let ring = SpscRing::new(4);
        let sink = CountingSink::default();
        let mut parser = Parser::new();

        let bytes = encode_records(&[1, 2, 3, 4, 5]);
        parser.feed(&bytes, &ring, &sink).unwrap();

        assert_eq!(sink.received.get(), 4);
        assert_eq!(sink.dropped.get(), 1);
        assert_eq!(ring.size(), 4);
        assert_eq!(ring.high_water_mark(), 4);
    }

    #[test]
    fn test_rx_timestamp_is_set() {
        let ring = SpscRing::new(4);
        let sink = CountingSink::default();
        let mut parser = Parser::new();

        let before = monotonic_ns();
        parser.feed(&encode_records(&[1]), &ring, &sink).unwrap();
        let slot = ring.try_pop().unwrap();
        assert!(slot.rx_ts >= before);
        assert!(slot.rx_ts <= monotonic_ns());
    }
}
