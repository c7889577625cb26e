use ndarray::{Array2, Zip};

use super::lane::Lane;
use super::model::{SpecData, NO_DATA};
use super::select::{extract, resolve, Selection};
use crate::error::{LaneError, Result};
use crate::time::Timestamp;

/// Largest accumulator grid an averaging call may allocate.
pub const MAX_GRID_CELLS: usize = 1 << 28;

/// Absorbs rounding when a frequency sits exactly on a bin edge.
const EDGE_TOLERANCE: f64 = 1e-9;

/// Target bin widths. `None` collapses that axis into a single bin.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Binning {
    /// Seconds.
    pub dt: Option<f64>,
    /// MHz.
    pub df: Option<f64>,
}

impl Binning {
    pub fn new(dt: Option<f64>, df: Option<f64>) -> Self {
        Binning { dt, df }
    }

    /// One bin per axis.
    pub fn full() -> Self {
        Binning::default()
    }
}

/// Left-aligned time bins of `width` nanoseconds; the last one is closed.
///
/// Spans are `i128`: two valid instants can be further apart than `i64::MAX`
/// nanoseconds.
#[derive(Debug, Clone, Copy)]
struct TimeBins {
    start: Timestamp,
    width: i128,
    count: usize,
}

impl TimeBins {
    fn new(start: Timestamp, end: Timestamp, width_seconds: Option<f64>) -> Self {
        let span = end.nanos_since(start).max(0);
        let width = width_seconds
            .map(|dt| (dt * 1e9).round() as i128)
            .unwrap_or(span)
            .max(1);
        let count = if span == 0 {
            1
        } else {
            usize::try_from((span + width - 1) / width).unwrap_or(usize::MAX)
        };
        TimeBins { start, width, count }
    }

    fn index(&self, t: Timestamp) -> usize {
        let offset = t.nanos_since(self.start).max(0);
        usize::try_from(offset / self.width)
            .unwrap_or(usize::MAX)
            .min(self.count - 1)
    }

    fn edges(&self) -> Vec<Timestamp> {
        // Every left edge lies in [start, end], so it fits an i64.
        (0..self.count)
            .map(|i| {
                let nanos = self.start.as_nanos() as i128 + i as i128 * self.width;
                Timestamp::from_nanos(nanos as i64)
            })
            .collect()
    }
}

/// Left-aligned frequency bins of `width` MHz; the last one is closed.
#[derive(Debug, Clone, Copy)]
struct FreqBins {
    start: f64,
    width: f64,
    count: usize,
}

impl FreqBins {
    /// Bins start at `start`; their number covers `span` MHz.
    fn new(start: f64, span: f64, width: Option<f64>) -> Self {
        let span = span.max(0.0);
        let width = width.unwrap_or(span);
        let count = if span == 0.0 || width == 0.0 {
            1
        } else {
            ((span / width - EDGE_TOLERANCE).ceil() as usize).max(1)
        };
        FreqBins { start, width, count }
    }

    fn index(&self, f: f64) -> usize {
        if self.count == 1 {
            return 0;
        }
        let i = ((f - self.start) / self.width + EDGE_TOLERANCE).floor().max(0.0) as usize;
        i.min(self.count - 1)
    }

    fn edges(&self) -> Vec<f64> {
        (0..self.count)
            .map(|j| self.start + j as f64 * self.width)
            .collect()
    }
}

/// Running sum and sample count per output cell.
#[derive(Debug)]
struct Accumulator {
    sums: Array2<f64>,
    counts: Array2<u64>,
}

impl Accumulator {
    fn new(shape: (usize, usize)) -> Self {
        Accumulator {
            sums: Array2::zeros(shape),
            counts: Array2::zeros(shape),
        }
    }

    /// Non-finite samples are not accumulated.
    fn add(&mut self, row: usize, col: usize, value: f64) {
        if value.is_finite() {
            self.sums[[row, col]] += value;
            self.counts[[row, col]] += 1;
        }
    }

    fn means(&self) -> Array2<f64> {
        Zip::from(&self.sums)
            .and(&self.counts)
            .map_collect(|&sum, &n| if n == 0 { NO_DATA } else { sum / n as f64 })
    }
}

fn check_width(name: &str, width: Option<f64>, span: f64, unit: &str) -> Result<()> {
    let Some(width) = width else {
        return Ok(());
    };
    if !(width.is_finite() && width > 0.0) {
        return Err(LaneError::InvalidBinWidth(format!("{name} = {width} {unit} must be positive")));
    }
    if width > span * (1.0 + 1e-12) {
        return Err(LaneError::InvalidBinWidth(format!(
            "{name} = {width} {unit} exceeds the requested span of {span} {unit}"
        )));
    }
    Ok(())
}

/// Rebin a selection to `binning`.
///
/// Time bins start at the first selected record and are counted over what is
/// left of the requested range. Frequency bins start at the lowest selected
/// channel and are counted over the requested range above
/// `max(low bound, that channel)`. Neither axis gets more bins than
/// `requested span / width`, rounded up, so widths equal to the requested
/// spans give exactly one cell. Each output cell is the mean of the samples
/// that fell in it, or [`NO_DATA`] when none did. Only one decoded record and
/// the accumulator grid are held in memory.
pub fn average(lane: &Lane, selection: &Selection, binning: &Binning) -> Result<SpecData> {
    let resolved = resolve(lane, selection)?;
    let (t0, t1) = resolved.time;
    let (f0, f1) = resolved.freq;
    check_width("dt", binning.dt, t1.seconds_since(t0), "s")?;
    check_width("df", binning.df, f1 - f0, "MHz")?;

    let query = lane.records_in(t0, t1, &[resolved.beam]);
    let layout = lane.layout();

    let time_bins = TimeBins::new(query.timestamps().next().unwrap_or(t0), t1, binning.dt);
    let lowest = layout.channel_frequency(resolved.channels.start);
    let freq_bins = FreqBins::new(lowest, f1 - f0.max(lowest), binning.df);

    let cells = time_bins.count.checked_mul(freq_bins.count);
    if cells.map_or(true, |n| n > MAX_GRID_CELLS) {
        return Err(LaneError::InvalidBinWidth(format!(
            "{} x {} bins exceed the {MAX_GRID_CELLS}-cell limit",
            time_bins.count, freq_bins.count
        )));
    }
    log::debug!(
        "averaging {} records into {} x {} bins (beam {}, {})",
        query.len(),
        time_bins.count,
        freq_bins.count,
        resolved.beam,
        resolved.polarization
    );

    let column_of: Vec<usize> = resolved
        .channels
        .clone()
        .map(|ch| freq_bins.index(layout.channel_frequency(ch)))
        .collect();

    let mut acc = Accumulator::new((time_bins.count, freq_bins.count));
    for record in query.iter()? {
        let record = record?;
        let row = time_bins.index(record.timestamp);
        let values = extract(&record, resolved.polarization, &resolved.channels)?;
        for (&col, v) in column_of.iter().zip(values) {
            acc.add(row, col, v);
        }
    }

    Ok(SpecData {
        time: time_bins.edges(),
        freq: freq_bins.edges(),
        data: acc.means(),
        polarization: resolved.polarization,
        beam: resolved.beam,
    })
}
