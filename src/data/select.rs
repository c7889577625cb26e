use std::ops::Range;

use ndarray::{Array2, ArrayView1};

use super::lane::Lane;
use super::layout::RecordLayout;
use super::model::{Polarization, Record, SpecData, NO_DATA};
use crate::error::{Axis, InvalidSelection, LaneError, Result};
use crate::time::Timestamp;

// ---------------------------------------------------------------------------
// Selection – what the caller asks for
// ---------------------------------------------------------------------------

/// Time/frequency/beam/polarization constraints. `None` means "whole lane"
/// for ranges and "lowest beam id" for the beam.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub time: Option<(Timestamp, Timestamp)>,
    /// MHz.
    pub freq: Option<(f64, f64)>,
    pub beam: Option<u32>,
    pub polarization: Polarization,
}

impl Default for Selection {
    fn default() -> Self {
        Selection {
            time: None,
            freq: None,
            beam: None,
            polarization: Polarization::I,
        }
    }
}

impl Selection {
    pub fn time(mut self, start: Timestamp, end: Timestamp) -> Self {
        self.time = Some((start, end));
        self
    }

    pub fn freq(mut self, low_mhz: f64, high_mhz: f64) -> Self {
        self.freq = Some((low_mhz, high_mhz));
        self
    }

    pub fn beam(mut self, beam: u32) -> Self {
        self.beam = Some(beam);
        self
    }

    pub fn polarization(mut self, polarization: Polarization) -> Self {
        self.polarization = polarization;
        self
    }
}

/// A selection checked against a lane, ready to stream.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Resolved {
    pub beam: u32,
    pub polarization: Polarization,
    /// Requested bounds, inclusive.
    pub time: (Timestamp, Timestamp),
    pub freq: (f64, f64),
    pub channels: Range<u32>,
}

/// Validate `selection` against `lane` without touching the file.
pub(crate) fn resolve(lane: &Lane, selection: &Selection) -> Result<Resolved> {
    let polarization = selection.polarization;
    if !lane.polarizations().contains(polarization) {
        return Err(InvalidSelection::Polarization {
            requested: polarization.to_string(),
            available: lane.polarizations().to_string(),
        }
        .into());
    }

    let beam = selection.beam.unwrap_or_else(|| lane.default_beam());
    let beam_index = lane.index().beam(beam).ok_or_else(|| InvalidSelection::Beam {
        requested: beam,
        available: lane.beam_ids(),
    })?;

    let (lane_t0, lane_t1) = lane.time_range();
    let (t0, t1) = selection.time.unwrap_or((lane_t0, lane_t1));
    if t1 < t0 {
        return Err(InvalidSelection::Time(format!("start {t0} is after end {t1}")).into());
    }
    if t0 > lane_t1 || t1 < lane_t0 {
        return Err(LaneError::EmptySelection { axis: Axis::Time });
    }

    let (lane_f0, lane_f1) = lane.freq_range();
    let (f0, f1) = selection.freq.unwrap_or((lane_f0, lane_f1));
    if !(f0.is_finite() && f1.is_finite()) {
        return Err(InvalidSelection::Frequency(format!("[{f0}, {f1}] is not finite")).into());
    }
    if f1 < f0 {
        return Err(InvalidSelection::Frequency(format!("low {f0} MHz is above high {f1} MHz")).into());
    }
    if f0 > lane_f1 || f1 < lane_f0 {
        return Err(LaneError::EmptySelection { axis: Axis::Frequency });
    }

    let channels = resolve_channels(
        lane.layout(),
        beam_index.first_channel..beam_index.first_channel + beam_index.channel_count,
        f0,
        f1,
    );
    if channels.is_empty() {
        return Err(LaneError::EmptySelection { axis: Axis::Frequency });
    }

    Ok(Resolved {
        beam,
        polarization,
        time: (t0, t1),
        freq: (f0, f1),
        channels,
    })
}

/// Channels of `span` whose band `[f, f + width)` meets `[low, high]`.
/// Edge channels are taken whole.
pub(crate) fn resolve_channels(layout: &RecordLayout, span: Range<u32>, low: f64, high: f64) -> Range<u32> {
    let width = layout.channel_width_mhz;
    let mut hits = span.filter(|&ch| {
        let edge = layout.channel_frequency(ch);
        edge <= high && edge + width > low
    });
    match hits.next() {
        Some(first) => {
            let last = hits.last().unwrap_or(first);
            first..last + 1
        }
        None => 0..0,
    }
}

/// Values of `polarization` restricted to `channels`.
pub(crate) fn extract(record: &Record, polarization: Polarization, channels: &Range<u32>) -> Result<Vec<f64>> {
    let values = record.product(polarization).ok_or_else(|| InvalidSelection::Polarization {
        requested: polarization.to_string(),
        available: format!("{:?}", record.values.keys().collect::<Vec<_>>()),
    })?;
    let start = channels.start.checked_sub(record.channels.start);
    let slice = start
        .map(|s| s as usize)
        .and_then(|s| values.get(s..s + channels.len()));
    match slice {
        Some(slice) => Ok(slice.to_vec()),
        None => Err(LaneError::CorruptStream {
            offset: 0,
            reason: format!(
                "record at {} covers channels {:?}, selection needs {:?}",
                record.timestamp, record.channels, channels
            ),
        }),
    }
}

// ---------------------------------------------------------------------------
// Selection engine
// ---------------------------------------------------------------------------

/// Full-resolution dynamic spectrum of one beam and polarization.
///
/// Memory is proportional to the selection: records are streamed one by one
/// into a pre-sized array.
pub fn select(lane: &Lane, selection: &Selection) -> Result<SpecData> {
    let resolved = resolve(lane, selection)?;
    let query = lane.records_in(resolved.time.0, resolved.time.1, &[resolved.beam]);
    log::debug!(
        "selecting {} records x {} channels ({}) from beam {}",
        query.len(),
        resolved.channels.len(),
        resolved.polarization,
        resolved.beam
    );

    let mut data = Array2::from_elem((query.len(), resolved.channels.len()), NO_DATA);
    let mut time = Vec::with_capacity(query.len());
    for (row, record) in query.iter()?.enumerate() {
        let record = record?;
        let values = extract(&record, resolved.polarization, &resolved.channels)?;
        data.row_mut(row).assign(&ArrayView1::from(&values[..]));
        time.push(record.timestamp);
    }

    let layout = lane.layout();
    let freq = resolved
        .channels
        .clone()
        .map(|ch| layout.channel_frequency(ch))
        .collect();

    Ok(SpecData {
        time,
        freq,
        data,
        polarization: resolved.polarization,
        beam: resolved.beam,
    })
}
