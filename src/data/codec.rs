use std::collections::BTreeMap;

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use super::layout::{Endianness, Field, RecordLayout, SampleEncoding};
use super::model::Record;
use crate::error::{LaneError, Result};
use crate::time::Timestamp;

/// Header fields of one record, decoded without touching the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub timestamp: Timestamp,
    pub beam: u32,
    pub first_channel: u32,
    pub channel_count: u32,
    pub declared_len: u64,
}

/// Stateless decoder/encoder for one record layout.
#[derive(Debug, Clone)]
pub struct RecordCodec {
    layout: RecordLayout,
}

impl RecordCodec {
    pub fn new(layout: RecordLayout) -> Result<Self> {
        layout.validate()?;
        Ok(RecordCodec { layout })
    }

    pub fn layout(&self) -> &RecordLayout {
        &self.layout
    }

    pub fn header_len(&self) -> usize {
        self.layout.header.length
    }

    pub fn record_len(&self) -> usize {
        self.layout.record_len()
    }

    /// Decode the header of the record starting at `buf[0]`.
    ///
    /// `origin` is the file offset of `buf[0]`, used in error reports only.
    pub fn decode_header(&self, buf: &[u8], origin: u64) -> Result<RecordHeader> {
        let header = &self.layout.header;
        if buf.len() < header.length {
            return Err(LaneError::malformed(
                origin,
                format!("{} bytes available, header needs {}", buf.len(), header.length),
            ));
        }

        if let Some(sync) = header.sync {
            let found = self.read_field(buf, sync.field);
            if found != sync.value {
                return Err(LaneError::malformed(
                    origin,
                    format!("sync word {found:#x}, expected {:#x}", sync.value),
                ));
            }
        }

        let channel_count = self.read_u32(buf, header.channel_count, "channel count", origin)?;
        if channel_count != self.layout.channels_per_record {
            return Err(LaneError::malformed(
                origin,
                format!(
                    "record carries {channel_count} channels, layout declares {}",
                    self.layout.channels_per_record
                ),
            ));
        }
        let first_channel = self.read_u32(buf, header.first_channel, "first channel", origin)?;
        if first_channel.checked_add(channel_count).is_none() {
            return Err(LaneError::malformed(
                origin,
                format!("channel span {first_channel}+{channel_count} overflows"),
            ));
        }
        let beam = self.read_u32(buf, header.beam, "beam", origin)?;

        let raw_time = self.read_field(buf, header.timestamp);
        let nanos = i64::try_from(raw_time)
            .ok()
            .and_then(|t| t.checked_mul(self.layout.time_unit.nanos_per_tick()))
            .ok_or_else(|| LaneError::malformed(origin, format!("timestamp {raw_time} out of range")))?;

        Ok(RecordHeader {
            timestamp: Timestamp::from_nanos(nanos),
            beam,
            first_channel,
            channel_count,
            declared_len: self.read_field(buf, header.record_length),
        })
    }

    /// Decode the record starting at `buf[at]`; returns it with the number of
    /// bytes consumed.
    pub fn decode(&self, buf: &[u8], at: usize) -> Result<(Record, usize)> {
        self.decode_from(buf, at, at as u64)
    }

    /// As [`decode`](Self::decode), reporting errors at file offset `origin`.
    pub(crate) fn decode_from(&self, buf: &[u8], at: usize, origin: u64) -> Result<(Record, usize)> {
        let rest = buf.get(at..).unwrap_or(&[]);
        let header = self.decode_header(rest, origin)?;

        let expected = self.record_len() as u64;
        if header.declared_len != expected {
            return Err(LaneError::malformed(
                origin,
                format!("declared length {}, layout implies {expected}", header.declared_len),
            ));
        }
        if (rest.len() as u64) < expected {
            return Err(LaneError::malformed(
                origin,
                format!("record needs {expected} bytes, only {} remain", rest.len()),
            ));
        }

        let n = self.layout.channels_per_record as usize;
        let width = self.layout.encoding.width();
        let mut values = BTreeMap::new();
        let mut cursor = self.header_len();
        for &pol in &self.layout.polarizations {
            let bytes = &rest[cursor..cursor + n * width];
            let samples = match self.layout.byte_order {
                Endianness::Little => read_samples::<LittleEndian>(self.layout.encoding, bytes),
                Endianness::Big => read_samples::<BigEndian>(self.layout.encoding, bytes),
            };
            values.insert(pol, samples);
            cursor += n * width;
        }

        let record = Record {
            timestamp: header.timestamp,
            beam: header.beam,
            channels: header.first_channel..header.first_channel + header.channel_count,
            values,
        };
        Ok((record, expected as usize))
    }

    /// Serialize `record` in this layout.
    pub fn encode(&self, record: &Record) -> Result<Vec<u8>> {
        let layout = &self.layout;
        if record.channel_count() != layout.channels_per_record as usize {
            return Err(LaneError::InvalidLayout(format!(
                "record has {} channels, layout declares {}",
                record.channel_count(),
                layout.channels_per_record
            )));
        }
        let ticks = record.timestamp.as_nanos() / layout.time_unit.nanos_per_tick();
        let ticks = u64::try_from(ticks).map_err(|_| {
            LaneError::InvalidLayout(format!("timestamp {} precedes the epoch", record.timestamp))
        })?;

        let mut out = vec![0u8; self.record_len()];
        let header = &layout.header;
        if let Some(sync) = header.sync {
            self.write_field(&mut out, sync.field, sync.value, "sync")?;
        }
        self.write_field(&mut out, header.record_length, self.record_len() as u64, "record length")?;
        self.write_field(&mut out, header.timestamp, ticks, "timestamp")?;
        self.write_field(&mut out, header.beam, record.beam.into(), "beam")?;
        self.write_field(&mut out, header.first_channel, record.channels.start.into(), "first channel")?;
        self.write_field(&mut out, header.channel_count, record.channel_count() as u64, "channel count")?;

        let width = layout.encoding.width();
        let mut cursor = header.length;
        for pol in &layout.polarizations {
            let samples = record.values.get(pol).ok_or_else(|| {
                LaneError::InvalidLayout(format!("record lacks stored product {pol}"))
            })?;
            if samples.len() != record.channel_count() {
                return Err(LaneError::InvalidLayout(format!(
                    "product {pol} has {} values for {} channels",
                    samples.len(),
                    record.channel_count()
                )));
            }
            let end = cursor + samples.len() * width;
            match layout.byte_order {
                Endianness::Little => write_samples::<LittleEndian>(layout.encoding, samples, &mut out[cursor..end]),
                Endianness::Big => write_samples::<BigEndian>(layout.encoding, samples, &mut out[cursor..end]),
            }
            cursor = end;
        }
        Ok(out)
    }

    // -- field helpers --

    fn read_field(&self, buf: &[u8], field: Field) -> u64 {
        let bytes = &buf[field.offset..field.offset + field.width];
        match self.layout.byte_order {
            Endianness::Little => LittleEndian::read_uint(bytes, field.width),
            Endianness::Big => BigEndian::read_uint(bytes, field.width),
        }
    }

    fn read_u32(&self, buf: &[u8], field: Field, name: &str, origin: u64) -> Result<u32> {
        let raw = self.read_field(buf, field);
        u32::try_from(raw).map_err(|_| LaneError::malformed(origin, format!("{name} {raw} out of range")))
    }

    fn write_field(&self, buf: &mut [u8], field: Field, value: u64, name: &str) -> Result<()> {
        if field.width < 8 && value >> (8 * field.width) != 0 {
            return Err(LaneError::InvalidLayout(format!(
                "{name} {value} does not fit in {} bytes",
                field.width
            )));
        }
        let bytes = &mut buf[field.offset..field.offset + field.width];
        match self.layout.byte_order {
            Endianness::Little => LittleEndian::write_uint(bytes, value, field.width),
            Endianness::Big => BigEndian::write_uint(bytes, value, field.width),
        }
        Ok(())
    }
}

fn read_samples<B: ByteOrder>(encoding: SampleEncoding, bytes: &[u8]) -> Vec<f64> {
    let chunks = bytes.chunks_exact(encoding.width());
    match encoding {
        SampleEncoding::F32 => chunks.map(|c| B::read_f32(c) as f64).collect(),
        SampleEncoding::F64 => chunks.map(B::read_f64).collect(),
        SampleEncoding::I16 { scale } => chunks.map(|c| B::read_i16(c) as f64 * scale).collect(),
        SampleEncoding::I32 { scale } => chunks.map(|c| B::read_i32(c) as f64 * scale).collect(),
    }
}

fn write_samples<B: ByteOrder>(encoding: SampleEncoding, samples: &[f64], out: &mut [u8]) {
    let chunks = out.chunks_exact_mut(encoding.width());
    for (chunk, &v) in chunks.zip(samples) {
        match encoding {
            SampleEncoding::F32 => B::write_f32(chunk, v as f32),
            SampleEncoding::F64 => B::write_f64(chunk, v),
            // `as` saturates, which is the clipping a fixed-point backend applies.
            SampleEncoding::I16 { scale } => B::write_i16(chunk, (v / scale).round() as i16),
            SampleEncoding::I32 { scale } => B::write_i32(chunk, (v / scale).round() as i32),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::layout::{HeaderLayout, TimeUnit};
    use crate::data::model::Polarization;

    fn small_layout() -> RecordLayout {
        RecordLayout {
            channels_per_record: 4,
            ..RecordLayout::default()
        }
    }

    fn record(ts: i64, values: Vec<f64>) -> Record {
        Record {
            timestamp: Timestamp::from_nanos(ts),
            beam: 2,
            channels: 200..204,
            values: [(Polarization::I, values)].into_iter().collect(),
        }
    }

    #[test]
    fn decodes_what_it_encodes() {
        let codec = RecordCodec::new(small_layout()).unwrap();
        let rec = record(1_570_087_255_000_000_000, vec![1.0, 2.5, -3.0, 0.0]);
        let bytes = codec.encode(&rec).unwrap();
        assert_eq!(bytes.len(), 32 + 16);
        assert_eq!(&bytes[0..4], &0x5350_4543u32.to_le_bytes());

        let (decoded, used) = codec.decode(&bytes, 0).unwrap();
        assert_eq!(used, bytes.len());
        assert_eq!(decoded, rec);
    }

    #[test]
    fn decodes_at_an_offset() {
        let codec = RecordCodec::new(small_layout()).unwrap();
        let mut buf = codec.encode(&record(10, vec![1.0; 4])).unwrap();
        buf.extend(codec.encode(&record(20, vec![2.0; 4])).unwrap());
        let (second, used) = codec.decode(&buf, 48).unwrap();
        assert_eq!(used, 48);
        assert_eq!(second.timestamp, Timestamp::from_nanos(20));
    }

    #[test]
    fn big_endian_fixed_point() {
        let layout = RecordLayout {
            byte_order: Endianness::Big,
            encoding: SampleEncoding::I16 { scale: 0.25 },
            time_unit: TimeUnit::Microseconds,
            polarizations: vec![Polarization::XX, Polarization::YY],
            ..small_layout()
        };
        let codec = RecordCodec::new(layout).unwrap();
        let mut rec = record(7_000, vec![0.25, 0.5, 1.0, -8.0]);
        rec.values = [
            (Polarization::XX, vec![0.25, 0.5, 1.0, -8.0]),
            (Polarization::YY, vec![1.0, 1.0, 1.0, 1.0]),
        ]
        .into_iter()
        .collect();
        let bytes = codec.encode(&rec).unwrap();
        // payload starts with XX[0] = 1 raw unit, big-endian
        assert_eq!(&bytes[32..34], &[0x00, 0x01]);
        let (decoded, _) = codec.decode(&bytes, 0).unwrap();
        assert_eq!(decoded, rec);
        assert_eq!(decoded.product(Polarization::I), Some(vec![1.25, 1.5, 2.0, -7.0]));
    }

    #[test]
    fn bad_sync_word_is_malformed() {
        let codec = RecordCodec::new(small_layout()).unwrap();
        let mut bytes = codec.encode(&record(1, vec![0.0; 4])).unwrap();
        bytes[0] ^= 0xff;
        let err = codec.decode(&bytes, 0).unwrap_err();
        assert!(matches!(err, LaneError::MalformedRecord { offset: 0, .. }), "{err}");
    }

    #[test]
    fn short_buffer_is_malformed() {
        let codec = RecordCodec::new(small_layout()).unwrap();
        let bytes = codec.encode(&record(1, vec![0.0; 4])).unwrap();
        assert!(matches!(
            codec.decode(&bytes[..40], 0),
            Err(LaneError::MalformedRecord { .. })
        ));
        assert!(matches!(
            codec.decode(&bytes[..10], 0),
            Err(LaneError::MalformedRecord { .. })
        ));
    }

    #[test]
    fn inconsistent_declared_length_is_malformed() {
        let codec = RecordCodec::new(small_layout()).unwrap();
        let mut bytes = codec.encode(&record(1, vec![0.0; 4])).unwrap();
        bytes[4..8].copy_from_slice(&1_000u32.to_le_bytes());
        let err = codec.decode(&bytes, 0).unwrap_err();
        assert!(err.to_string().contains("declared length 1000"), "{err}");
    }

    #[test]
    fn channel_count_must_match_layout() {
        let codec = RecordCodec::new(small_layout()).unwrap();
        let mut bytes = codec.encode(&record(1, vec![0.0; 4])).unwrap();
        bytes[24..28].copy_from_slice(&5u32.to_le_bytes());
        assert!(matches!(
            codec.decode_header(&bytes, 96),
            Err(LaneError::MalformedRecord { offset: 96, .. })
        ));
    }

    #[test]
    fn header_without_sync_word() {
        let layout = RecordLayout {
            header: HeaderLayout {
                sync: None,
                ..HeaderLayout::default()
            },
            ..small_layout()
        };
        let codec = RecordCodec::new(layout).unwrap();
        let bytes = codec.encode(&record(3, vec![1.0; 4])).unwrap();
        assert_eq!(&bytes[0..4], &[0, 0, 0, 0]);
        assert_eq!(codec.decode_header(&bytes, 0).unwrap().beam, 2);
    }
}
