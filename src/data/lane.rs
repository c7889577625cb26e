use std::fs::File;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use super::average::{self, Binning};
use super::codec::RecordCodec;
use super::index::StreamIndex;
use super::layout::RecordLayout;
use super::model::{BeamInfo, LaneInfo, PolarizationSet, Record, SpecData};
use super::select::{self, Selection};
use crate::error::{LaneError, Result};
use crate::time::{parse_time, Timestamp};

// ---------------------------------------------------------------------------
// Lane – one indexed file
// ---------------------------------------------------------------------------

/// An opened lane file: its handle, its layout and its index.
///
/// Immutable once built. Records are fetched with positional reads on the
/// shared handle, so several selections may run against the same `Lane` at
/// once, and renaming or replacing the path after open does not redirect them.
#[derive(Debug)]
pub struct Lane {
    path: PathBuf,
    file: File,
    lane_id: Option<u32>,
    codec: RecordCodec,
    index: StreamIndex,
    polarizations: PolarizationSet,
}

impl Lane {
    /// Open with the default record layout.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_layout(path, RecordLayout::default())
    }

    pub fn open_with_layout(path: impl AsRef<Path>, layout: RecordLayout) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let codec = RecordCodec::new(layout)?;
        let file = File::open(&path).map_err(|e| LaneError::io(&path, e))?;
        let index = StreamIndex::build(&path, &file, &codec)?;
        let polarizations = PolarizationSet::from_stored(&codec.layout().polarizations);

        let lane = Lane {
            lane_id: lane_id_from_path(&path),
            path,
            file,
            codec,
            index,
            polarizations,
        };
        let (t0, t1) = lane.time_range();
        log::info!(
            "opened {}: {} records, beams {:?}, {} .. {}",
            lane.path.display(),
            lane.index.len(),
            lane.beam_ids(),
            t0,
            t1
        );
        Ok(lane)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lane_id(&self) -> Option<u32> {
        self.lane_id
    }

    pub fn layout(&self) -> &RecordLayout {
        self.codec.layout()
    }

    pub fn index(&self) -> &StreamIndex {
        &self.index
    }

    pub fn polarizations(&self) -> &PolarizationSet {
        &self.polarizations
    }

    pub fn time_range(&self) -> (Timestamp, Timestamp) {
        self.index.time_range()
    }

    /// `[lowest channel lower edge, highest channel upper edge]` over all beams, MHz.
    pub fn freq_range(&self) -> (f64, f64) {
        let beams = self.beam_infos();
        let lo = beams.iter().map(|b| b.freq_range.0).fold(f64::INFINITY, f64::min);
        let hi = beams.iter().map(|b| b.freq_range.1).fold(f64::NEG_INFINITY, f64::max);
        (lo, hi)
    }

    pub fn beam_ids(&self) -> Vec<u32> {
        self.index.beams().keys().copied().collect()
    }

    /// Lowest beam id; the default when a selection names none.
    pub fn default_beam(&self) -> u32 {
        self.index.beams().keys().next().copied().unwrap_or(0)
    }

    fn beam_infos(&self) -> Vec<BeamInfo> {
        let layout = self.layout();
        self.index
            .beams()
            .iter()
            .map(|(&beam, idx)| BeamInfo {
                beam,
                first_channel: idx.first_channel,
                channel_count: idx.channel_count,
                records: idx.positions.len(),
                freq_range: (
                    layout.channel_frequency(idx.first_channel),
                    layout.channel_frequency(idx.first_channel + idx.channel_count - 1)
                        + layout.channel_width_mhz,
                ),
            })
            .collect()
    }

    /// Structured metadata; rendering is up to the caller.
    pub fn info(&self) -> LaneInfo {
        LaneInfo {
            path: self.path.clone(),
            lane_id: self.lane_id,
            time_range: self.time_range(),
            freq_range: self.freq_range(),
            channel_width_mhz: self.layout().channel_width_mhz,
            beams: self.beam_infos(),
            polarizations: self.polarizations.clone(),
            record_count: self.index.len(),
            truncated_records: self.index.truncated_records(),
            truncated_bytes: self.index.truncated_bytes(),
        }
    }

    /// Parse a time, resolving bare times of day on the lane's start date.
    pub fn parse_time(&self, input: &str) -> Result<Timestamp> {
        Ok(parse_time(input, Some(self.time_range().0.date()))?)
    }

    /// Records of `beams` with `start <= timestamp <= end`, ascending in time.
    ///
    /// Nothing is read until the returned query is iterated. A range outside
    /// the lane yields an empty query.
    pub fn records_in(&self, start: Timestamp, end: Timestamp, beams: &[u32]) -> RecordQuery<'_> {
        RecordQuery {
            lane: self,
            positions: self.index.positions_in(start, end, beams),
        }
    }

    pub fn select(&self, selection: &Selection) -> Result<SpecData> {
        select::select(self, selection)
    }

    pub fn average(&self, selection: &Selection, binning: &Binning) -> Result<SpecData> {
        average::average(self, selection, binning)
    }
}

fn lane_id_from_path(path: &Path) -> Option<u32> {
    path.file_stem()?
        .to_str()?
        .rsplit('_')
        .next()?
        .parse()
        .ok()
}

// ---------------------------------------------------------------------------
// RecordQuery – lazy, restartable record sequence
// ---------------------------------------------------------------------------

/// A resolved set of index entries; iterate it as often as needed.
#[derive(Debug, Clone)]
pub struct RecordQuery<'a> {
    lane: &'a Lane,
    positions: Vec<usize>,
}

impl<'a> RecordQuery<'a> {
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Timestamps of the selected records, straight from the index.
    pub fn timestamps(&self) -> impl Iterator<Item = Timestamp> + '_ {
        let entries = self.lane.index.entries();
        self.positions.iter().map(move |&i| entries[i].timestamp)
    }

    /// Start a fresh pass after checking the file still has its indexed length.
    pub fn iter(&self) -> Result<Records<'_>> {
        let path = self.lane.path();
        let len = self.lane.file.metadata().map_err(|e| LaneError::io(path, e))?.len();
        if len != self.lane.index.file_len() {
            return Err(LaneError::corrupt(
                len.min(self.lane.index.file_len()),
                format!(
                    "file is {len} bytes, {} when indexed; reopen the lane",
                    self.lane.index.file_len()
                ),
            ));
        }
        Ok(Records {
            lane: self.lane,
            positions: &self.positions,
            next: 0,
            buf: vec![0u8; self.lane.codec.record_len()],
        })
    }
}

/// One pass over a [`RecordQuery`], decoding records by positional reads.
pub struct Records<'a> {
    lane: &'a Lane,
    positions: &'a [usize],
    next: usize,
    buf: Vec<u8>,
}

impl Records<'_> {
    fn read_next(&mut self, position: usize) -> Result<Record> {
        let entry = self.lane.index.entries()[position];
        let buf = &mut self.buf[..entry.byte_length as usize];
        read_exact_at(&self.lane.file, buf, entry.byte_offset).map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => {
                LaneError::corrupt(entry.byte_offset, "file ended inside an indexed record")
            }
            _ => LaneError::io(self.lane.path(), e),
        })?;

        let (record, _) = self.lane.codec.decode_from(buf, 0, entry.byte_offset)?;
        Ok(record)
    }
}

impl Iterator for Records<'_> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        let position = *self.positions.get(self.next)?;
        self.next += 1;
        let result = self.read_next(position);
        if result.is_err() {
            // Header desync cannot be skipped safely; end the pass.
            self.next = self.positions.len();
        }
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.positions.len() - self.next;
        (left, Some(left))
    }
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    std::os::unix::fs::FileExt::read_exact_at(file, buf, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, offset) {
            Ok(0) => return Err(io::Error::from(ErrorKind::UnexpectedEof)),
            Ok(n) => {
                buf = &mut buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
