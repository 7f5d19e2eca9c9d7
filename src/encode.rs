/// Wire encoders for the synthetic feed
///
/// The binary transport is bare little-endian records with no framing.
/// FIX and ITCH are framed with a SOFH (Simple Open Framing Header):
/// 4-byte big-endian total length followed by a 2-byte encoding type.

use crate::record::Record;
use crate::timing::monotonic_ns;
use byteorder::{BigEndian, ByteOrder};
use chrono::Utc;

pub const SOFH_SIZE: usize = 6;
pub const SOFH_ENCODING_FIX: u16 = 0x5000;
pub const SOFH_ENCODING_ITCH: u16 = 0x4954;

/// ITCH quote: type(1) | timestamp(8) | seq(8) | price(4) | qty(4) | side(1),
/// all integers big-endian, price scaled by 10^4.
pub const ITCH_MSG_SIZE: usize = 26;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodingType {
    Binary,
    Fix,
    Itch,
}

impl std::str::FromStr for EncodingType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "binary" => Ok(EncodingType::Binary),
            "fix" => Ok(EncodingType::Fix),
            "itch" => Ok(EncodingType::Itch),
            other => Err(format!("unknown encoding: {other}")),
        }
    }
}

impl std::fmt::Display for EncodingType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EncodingType::Binary => "binary",
            EncodingType::Fix => "fix",
            EncodingType::Itch => "itch",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct EncodingConfig {
    pub sender_comp_id: String,
    pub target_comp_id: String,
}

impl Default for EncodingConfig {
    fn default() -> Self {
        EncodingConfig {
            sender_comp_id: "FEED_SIM".to_string(),
            target_comp_id: "CLIENT".to_string(),
        }
    }
}

/// Batch encoder. `encode_into` clears and refills the output buffer so
/// the caller can reuse one allocation across batches.
pub trait Encoder: Send {
    fn encode_into(&mut self, records: &[Record], out: &mut Vec<u8>);
}

fn write_sofh(out: &mut Vec<u8>, body_len: usize, encoding: u16) {
    let mut header = [0u8; SOFH_SIZE];
    BigEndian::write_u32(&mut header[0..4], (SOFH_SIZE + body_len) as u32);
    BigEndian::write_u16(&mut header[4..6], encoding);
    out.extend_from_slice(&header);
}

/// Raw little-endian records, concatenated.
pub struct BinaryEncoder;

impl Encoder for BinaryEncoder {
    fn encode_into(&mut self, records: &[Record], out: &mut Vec<u8>) {
        out.clear();
        out.reserve(records.len() * Record::SIZE);
        let mut buf = [0u8; Record::SIZE];
        for record in records {
            record.write_to(&mut buf);
            out.extend_from_slice(&buf);
        }
    }
}

/// FIX 4.4 Market Data Incremental Refresh, one entry per record, framed
/// with SOFH.
pub struct FixEncoder {
    config: EncodingConfig,
}

impl FixEncoder {
    pub fn new(config: EncodingConfig) -> Self {
        FixEncoder { config }
    }
}

impl Encoder for FixEncoder {
    fn encode_into(&mut self, records: &[Record], out: &mut Vec<u8>) {
        out.clear();
        let sending_time = Utc::now().format("%Y%m%d-%H:%M:%S").to_string();
        for record in records {
            let (seq, price, quantity) = (record.seq(), record.price(), record.quantity());
            // 269: 0 = bid, 1 = offer, by quantity sign
            let entry_type = if quantity > 0 { '0' } else { '1' };
            let body = format!(
                "35=X\x0149={}\x0156={}\x0134={}\x0152={}\x01268=1\x01279=0\x01269={}\x01270={:.4}\x01271={}\x01",
                self.config.sender_comp_id,
                self.config.target_comp_id,
                seq,
                sending_time,
                entry_type,
                price,
                quantity.unsigned_abs(),
            );
            let framed = format!("8=FIX.4.4\x019={}\x01{}", body.len(), body);
            let checksum = framed.bytes().map(u32::from).sum::<u32>() % 256;
            // Tag 10 is always three digits
            let message = format!("{framed}10={checksum:03}\x01");

            write_sofh(out, message.len(), SOFH_ENCODING_FIX);
            out.extend_from_slice(message.as_bytes());
        }
    }
}

/// Fixed-width big-endian quote messages, framed with SOFH. The batch
/// shares one timestamp.
pub struct ItchEncoder;

impl Encoder for ItchEncoder {
    fn encode_into(&mut self, records: &[Record], out: &mut Vec<u8>) {
        out.clear();
        out.reserve(records.len() * (SOFH_SIZE + ITCH_MSG_SIZE));
        let timestamp_ns = monotonic_ns();
        for record in records {
            let (seq, price, quantity) = (record.seq(), record.price(), record.quantity());
            write_sofh(out, ITCH_MSG_SIZE, SOFH_ENCODING_ITCH);

            let mut msg = [0u8; ITCH_MSG_SIZE];
            msg[0] = b'Q';
            BigEndian::write_u64(&mut msg[1..9], timestamp_ns);
            BigEndian::write_u64(&mut msg[9..17], seq);
            BigEndian::write_u32(&mut msg[17..21], (price * 10_000.0) as u32);
            BigEndian::write_u32(&mut msg[21..25], quantity.unsigned_abs());
            msg[25] = if quantity > 0 { b'B' } else { b'S' };
            out.extend_from_slice(&msg);
        }
    }
}

pub fn create_encoder(encoding: EncodingType, config: EncodingConfig) -> Box<dyn Encoder> {
    match encoding {
        EncodingType::Binary => Box::new(BinaryEncoder),
        EncodingType::Fix => Box::new(FixEncoder::new(config)),
        EncodingType::Itch => Box::new(ItchEncoder),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_records() -> Vec<Record> {
        vec![Record::new(1, 100.5, 10), Record::new(2, 99.75, -5)]
    }

    #[test]
    fn test_binary_round_trip() {
        let mut encoder = BinaryEncoder;
        let mut out = Vec::new();
        encoder.encode_into(&sample_records(), &mut out);

        assert_eq!(out.len(), 2 * Record::SIZE);
        let first = Record::read_from(&out[..Record::SIZE]);
        let second = Record::read_from(&out[Record::SIZE..]);
        assert_eq!(first.seq(), 1);
        assert_eq!(second.seq(), 2);
        assert_eq!(second.quantity(), -5);
    }

    #[test]
    fn test_itch_layout() {
        let mut encoder = ItchEncoder;
        let mut out = Vec::new();
        encoder.encode_into(&sample_records(), &mut out);

        assert_eq!(out.len(), 2 * (SOFH_SIZE + ITCH_MSG_SIZE));

        // SOFH of the first message
        assert_eq!(
            BigEndian::read_u32(&out[0..4]) as usize,
            SOFH_SIZE + ITCH_MSG_SIZE
        );
        assert_eq!(BigEndian::read_u16(&out[4..6]), SOFH_ENCODING_ITCH);

        let msg = &out[SOFH_SIZE..SOFH_SIZE + ITCH_MSG_SIZE];
        assert_eq!(msg[0], b'Q');
        assert_eq!(BigEndian::read_u64(&msg[9..17]), 1);
        assert_eq!(BigEndian::read_u32(&msg[17..21]), 1_005_000);
        assert_eq!(BigEndian::read_u32(&msg[21..25]), 10);
        assert_eq!(msg[25], b'B');

        // Second record is a sell
        let msg = &out[2 * SOFH_SIZE + ITCH_MSG_SIZE..];
        assert_eq!(msg[25], b'S');
    }

    #[test]
    fn test_fix_framing_and_checksum() {
        let mut encoder = FixEncoder::new(EncodingConfig::default());
        let mut out = Vec::new();
        encoder.encode_into(&sample_records()[..1], &mut out);

        let declared = BigEndian::read_u32(&out[0..4]) as usize;
        assert_eq!(declared, out.len());
        assert_eq!(BigEndian::read_u16(&out[4..6]), SOFH_ENCODING_FIX);

        let body = std::str::from_utf8(&out[SOFH_SIZE..]).unwrap();
        assert!(body.starts_with("8=FIX.4.4\x01"));
        assert!(body.contains("35=X\x01"));
        assert!(body.contains("34=1\x01"));
        assert!(body.contains("269=0\x01"));
        assert!(body.contains("270=100.5000\x01"));

        // Checksum covers everything before the 10= tag
        let tag_pos = body.rfind("10=").unwrap();
        let expected: u32 = body[..tag_pos].bytes().map(u32::from).sum::<u32>() % 256;
        let declared_sum: u32 = body[tag_pos + 3..tag_pos + 6].parse().unwrap();
        assert_eq!(declared_sum, expected);
        assert!(body.ends_with('\x01'));
    }

    #[test]
    fn test_encoder_factory() {
        let mut out = Vec::new();
        let records = sample_records();

        let mut encoder = create_encoder(EncodingType::Binary, EncodingConfig::default());
        encoder.encode_into(&records, &mut out);
        assert_eq!(out.len(), 2 * Record::SIZE);

        let mut encoder = create_encoder(EncodingType::Itch, EncodingConfig::default());
        encoder.encode_into(&records, &mut out);
        assert_eq!(out.len(), 2 * (SOFH_SIZE + ITCH_MSG_SIZE));
    }
}
