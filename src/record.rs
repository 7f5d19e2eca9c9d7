/// Core market data types
///
/// The 20-byte wire record, the cache-line-aligned ring slot, and the
/// fan-in payload carrying feed origin information.

use byteorder::{ByteOrder, LittleEndian};
use std::mem;

/// The fundamental unit of market data crossing the wire and the ring.
/// Packed layout: seq(8) | price(8) | quantity(4), little-endian on the
/// wire. Fields are reached through copying accessors because references
/// into a packed struct may be unaligned.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, Default)]
pub struct Record {
    seq: u64,
    price: f64,
    quantity: i32,
}

impl Record {
    pub const SIZE: usize = 20;

    pub fn new(seq: u64, price: f64, quantity: i32) -> Self {
        Record { seq, price, quantity }
    }

    /// Monotonically increasing per-feed sequence number (> 0 for valid
    /// records).
    #[inline]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    #[inline]
    pub fn price(&self) -> f64 {
        self.price
    }

    /// Positive = buy, negative = sell; zero is invalid.
    #[inline]
    pub fn quantity(&self) -> i32 {
        self.quantity
    }

    /// Decode a record from exactly `SIZE` little-endian bytes.
    pub fn read_from(buf: &[u8]) -> Self {
        debug_assert!(buf.len() >= Self::SIZE);
        Record {
            seq: LittleEndian::read_u64(&buf[0..8]),
            price: LittleEndian::read_f64(&buf[8..16]),
            quantity: LittleEndian::read_i32(&buf[16..20]),
        }
    }

    /// Encode into exactly `SIZE` little-endian bytes.
    pub fn write_to(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= Self::SIZE);
        let (seq, price, quantity) = (self.seq, self.price, self.quantity);
        LittleEndian::write_u64(&mut buf[0..8], seq);
        LittleEndian::write_f64(&mut buf[8..16], price);
        LittleEndian::write_i32(&mut buf[16..20], quantity);
    }

    pub fn is_valid(&self) -> bool {
        let (seq, quantity) = (self.seq, self.quantity);
        seq > 0 && quantity != 0
    }
}

/// Ring buffer cell: one record plus its receive timestamp.
/// Aligned to a cache line so adjacent cells never share one.
#[repr(C, align(64))]
#[derive(Debug, Clone, Copy, Default)]
pub struct Slot {
    pub record: Record,
    /// Receive timestamp in nanoseconds (monotonic raw clock)
    pub rx_ts: u64,
}

impl Slot {
    pub fn new(record: Record, rx_ts: u64) -> Self {
        Slot { record, rx_ts }
    }
}

/// Fan-in payload: a slot tagged with the feed it came from.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct FeedSlot {
    pub slot: Slot,
    /// Unique per-feed identifier assigned at configuration time
    pub origin_id: u32,
    /// When the drain step re-published this slot (nanoseconds, monotonic)
    pub arrival_ns: u64,
}

// Compile-time assertions for memory layout
const _: () = {
    assert!(mem::size_of::<Record>() == Record::SIZE);
    assert!(mem::size_of::<Slot>() == 64);
    assert!(mem::align_of::<Slot>() == 64);
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_round_trip() {
        let rec = Record::new(42, 101.25, -7);
        let mut buf = [0u8; Record::SIZE];
        rec.write_to(&mut buf);
        let back = Record::read_from(&buf);
        assert_eq!(back.seq(), 42);
        assert_eq!(back.price(), 101.25);
        assert_eq!(back.quantity(), -7);
    }

    #[test]
    fn test_record_validity() {
        assert!(Record::new(1, 100.0, 5).is_valid());
        assert!(!Record::new(0, 100.0, 5).is_valid());
        assert!(!Record::new(1, 100.0, 0).is_valid());
    }

    #[test]
    fn test_wire_layout_is_little_endian() {
        let rec = Record::new(0x0102030405060708, 0.0, 0x11223344);
        let mut buf = [0u8; Record::SIZE];
        rec.write_to(&mut buf);
        assert_eq!(buf[0], 0x08);
        assert_eq!(buf[7], 0x01);
        assert_eq!(buf[16], 0x44);
        assert_eq!(buf[19], 0x11);
    }
}
