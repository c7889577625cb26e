use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

use super::codec::RecordCodec;
use super::model::IndexEntry;
use crate::error::{LaneError, Result};
use crate::time::Timestamp;

/// Per-beam view over the file-wide entry list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeamIndex {
    /// Positions into `StreamIndex::entries`, ascending in time.
    pub positions: Vec<usize>,
    pub first_channel: u32,
    pub channel_count: u32,
}

impl BeamIndex {
    pub fn time_range(&self, entries: &[IndexEntry]) -> (Timestamp, Timestamp) {
        let first = self.positions.first().map(|&i| entries[i].timestamp);
        let last = self.positions.last().map(|&i| entries[i].timestamp);
        match (first, last) {
            (Some(a), Some(b)) => (a, b),
            // Never constructed without at least one record.
            _ => (Timestamp::from_nanos(0), Timestamp::from_nanos(0)),
        }
    }
}

/// Header-only index of a lane file, built in one front-to-back pass.
#[derive(Debug, Clone)]
pub struct StreamIndex {
    entries: Vec<IndexEntry>,
    beams: BTreeMap<u32, BeamIndex>,
    time_range: (Timestamp, Timestamp),
    truncated_records: usize,
    truncated_bytes: u64,
    file_len: u64,
}

impl StreamIndex {
    /// Index the open `file`; `path` is only used in error messages.
    pub fn build(path: &Path, file: &File, codec: &RecordCodec) -> Result<Self> {
        let file_len = file.metadata().map_err(|e| LaneError::io(path, e))?.len();
        Self::scan(BufReader::new(file), file_len, codec)
            .map_err(|e| match e {
                LaneError::Io { source, .. } => LaneError::io(path, source),
                other => other,
            })
    }

    /// Scan `file_len` bytes of `reader`, reading headers and skipping payloads.
    pub fn scan<R: Read + Seek>(
        mut reader: BufReader<R>,
        file_len: u64,
        codec: &RecordCodec,
    ) -> Result<Self> {
        let header_len = codec.header_len() as u64;
        let record_len = codec.record_len() as u64;
        let mut header = vec![0u8; codec.header_len()];

        let mut entries: Vec<IndexEntry> = Vec::new();
        let mut beams: BTreeMap<u32, BeamIndex> = BTreeMap::new();
        let mut truncated_records = 0;
        let mut truncated_bytes = 0;
        let mut offset = 0u64;

        while offset < file_len {
            let remaining = file_len - offset;
            if remaining < header_len {
                truncated_records = 1;
                truncated_bytes = remaining;
                break;
            }
            reader
                .read_exact(&mut header)
                .map_err(|e| LaneError::io("<stream>", e))?;
            let h = codec.decode_header(&header, offset)?;

            if h.declared_len != record_len {
                return Err(LaneError::corrupt(
                    offset,
                    format!(
                        "record declares {} bytes, layout implies {record_len} ({} bytes remain in file)",
                        h.declared_len, remaining
                    ),
                ));
            }
            if record_len > remaining {
                // The backend stopped mid-record.
                truncated_records = 1;
                truncated_bytes = remaining;
                break;
            }

            let position = entries.len();
            match beams.entry(h.beam) {
                Entry::Vacant(slot) => {
                    slot.insert(BeamIndex {
                        positions: vec![position],
                        first_channel: h.first_channel,
                        channel_count: h.channel_count,
                    });
                }
                Entry::Occupied(mut slot) => {
                    let beam = slot.get_mut();
                    if (beam.first_channel, beam.channel_count) != (h.first_channel, h.channel_count) {
                        return Err(LaneError::corrupt(
                            offset,
                            format!(
                                "beam {} switches channel span from {}+{} to {}+{}",
                                h.beam, beam.first_channel, beam.channel_count, h.first_channel, h.channel_count
                            ),
                        ));
                    }
                    if let Some(&last) = beam.positions.last() {
                        let previous = entries[last].timestamp;
                        if h.timestamp <= previous {
                            return Err(LaneError::corrupt(
                                offset,
                                format!(
                                    "beam {} timestamp {} does not advance past {}",
                                    h.beam, h.timestamp, previous
                                ),
                            ));
                        }
                    }
                    beam.positions.push(position);
                }
            }
            entries.push(IndexEntry {
                timestamp: h.timestamp,
                beam: h.beam,
                byte_offset: offset,
                byte_length: record_len as u32,
            });

            reader
                .seek_relative((record_len - header_len) as i64)
                .map_err(|e| LaneError::io("<stream>", e))?;
            offset += record_len;
        }

        let first = entries.iter().map(|e| e.timestamp).min();
        let last = entries.iter().map(|e| e.timestamp).max();
        let time_range = match (first, last) {
            (Some(a), Some(b)) => (a, b),
            _ => {
                return Err(LaneError::corrupt(
                    0,
                    format!("no complete record in {file_len} bytes"),
                ))
            }
        };

        if truncated_records > 0 {
            log::warn!(
                "skipping truncated trailing record ({truncated_bytes} bytes at offset {offset})"
            );
        }
        log::debug!(
            "indexed {} records over {} beams, {} bytes",
            entries.len(),
            beams.len(),
            file_len
        );

        Ok(StreamIndex {
            entries,
            beams,
            time_range,
            truncated_records,
            truncated_bytes,
            file_len,
        })
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn beams(&self) -> &BTreeMap<u32, BeamIndex> {
        &self.beams
    }

    pub fn beam(&self, beam: u32) -> Option<&BeamIndex> {
        self.beams.get(&beam)
    }

    /// `[earliest, latest]` timestamp over all beams.
    pub fn time_range(&self) -> (Timestamp, Timestamp) {
        self.time_range
    }

    pub fn truncated_records(&self) -> usize {
        self.truncated_records
    }

    pub fn truncated_bytes(&self) -> u64 {
        self.truncated_bytes
    }

    pub fn file_len(&self) -> u64 {
        self.file_len
    }

    /// Positions of the entries with `start <= timestamp <= end` belonging to
    /// one of `beams`, in ascending timestamp order.
    pub fn positions_in(&self, start: Timestamp, end: Timestamp, beams: &[u32]) -> Vec<usize> {
        let mut selected = Vec::new();
        if end < start {
            return selected;
        }
        for beam in beams {
            let Some(index) = self.beams.get(beam) else {
                continue;
            };
            let lo = index
                .positions
                .partition_point(|&i| self.entries[i].timestamp < start);
            let hi = index
                .positions
                .partition_point(|&i| self.entries[i].timestamp <= end);
            selected.extend_from_slice(&index.positions[lo..hi]);
        }
        if beams.len() > 1 {
            selected.sort_by_key(|&i| (self.entries[i].timestamp, self.entries[i].byte_offset));
        }
        selected
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::data::layout::RecordLayout;
    use crate::data::model::{Polarization, Record};

    fn codec() -> RecordCodec {
        RecordCodec::new(RecordLayout {
            channels_per_record: 2,
            ..RecordLayout::default()
        })
        .unwrap()
    }

    fn encode(codec: &RecordCodec, beam: u32, ts: i64) -> Vec<u8> {
        let rec = Record {
            timestamp: Timestamp::from_nanos(ts),
            beam,
            channels: 10..12,
            values: [(Polarization::I, vec![ts as f64, 1.0])].into_iter().collect(),
        };
        codec.encode(&rec).unwrap()
    }

    fn scan(codec: &RecordCodec, bytes: Vec<u8>) -> Result<StreamIndex> {
        let len = bytes.len() as u64;
        StreamIndex::scan(BufReader::new(Cursor::new(bytes)), len, codec)
    }

    #[test]
    fn indexes_interleaved_beams() {
        let codec = codec();
        let mut bytes = Vec::new();
        for (beam, ts) in [(0, 10), (1, 5), (0, 20), (1, 15), (0, 30)] {
            bytes.extend(encode(&codec, beam, ts));
        }
        let index = scan(&codec, bytes).unwrap();

        assert_eq!(index.len(), 5);
        assert_eq!(index.time_range(), (Timestamp::from_nanos(5), Timestamp::from_nanos(30)));
        assert_eq!(index.beam(0).unwrap().positions, vec![0, 2, 4]);
        assert_eq!(index.beam(1).unwrap().positions, vec![1, 3]);
        assert_eq!(index.entries()[3].byte_offset, 3 * codec.record_len() as u64);

        let both = index.positions_in(Timestamp::from_nanos(10), Timestamp::from_nanos(20), &[0, 1]);
        assert_eq!(both, vec![0, 3, 2]);
        let none = index.positions_in(Timestamp::from_nanos(31), Timestamp::from_nanos(40), &[0, 1]);
        assert!(none.is_empty());
    }

    #[test]
    fn trailing_partial_record_is_counted_not_fatal() {
        let codec = codec();
        let mut bytes = encode(&codec, 0, 1);
        let partial = encode(&codec, 0, 2);
        bytes.extend_from_slice(&partial[..codec.header_len() + 3]);
        let index = scan(&codec, bytes).unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.truncated_records(), 1);
        assert_eq!(index.truncated_bytes(), codec.header_len() as u64 + 3);
    }

    #[test]
    fn partial_header_is_counted_too() {
        let codec = codec();
        let mut bytes = encode(&codec, 0, 1);
        bytes.extend_from_slice(&[0x43, 0x45]);
        let index = scan(&codec, bytes).unwrap();
        assert_eq!(index.truncated_records(), 1);
        assert_eq!(index.truncated_bytes(), 2);
    }

    #[test]
    fn oversized_length_claim_is_corrupt() {
        let codec = codec();
        let mut bytes = encode(&codec, 0, 1);
        let mut bad = encode(&codec, 0, 2);
        bad[4..8].copy_from_slice(&1_000_000u32.to_le_bytes());
        bytes.extend(bad);
        let err = scan(&codec, bytes).unwrap_err();
        assert!(matches!(err, LaneError::CorruptStream { offset, .. } if offset == codec.record_len() as u64), "{err}");
    }

    #[test]
    fn decreasing_time_within_a_beam_is_corrupt() {
        let codec = codec();
        let mut bytes = encode(&codec, 0, 20);
        bytes.extend(encode(&codec, 1, 5));
        bytes.extend(encode(&codec, 0, 10));
        assert!(matches!(scan(&codec, bytes), Err(LaneError::CorruptStream { .. })));
    }

    #[test]
    fn repeated_time_within_a_beam_is_corrupt() {
        let codec = codec();
        let mut bytes = encode(&codec, 0, 20);
        bytes.extend(encode(&codec, 0, 20));
        assert!(matches!(scan(&codec, bytes), Err(LaneError::CorruptStream { .. })));
    }

    #[test]
    fn desynchronized_header_is_malformed() {
        let codec = codec();
        let mut bytes = encode(&codec, 0, 1);
        bytes.extend(vec![0xAB; codec.record_len()]);
        assert!(matches!(scan(&codec, bytes), Err(LaneError::MalformedRecord { .. })));
    }

    #[test]
    fn empty_file_is_corrupt() {
        let codec = codec();
        assert!(matches!(scan(&codec, Vec::new()), Err(LaneError::CorruptStream { .. })));
    }
}
