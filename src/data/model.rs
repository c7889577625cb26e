use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::{Add, Div, Mul, Range, Sub};
use std::path::PathBuf;
use std::str::FromStr;

use ndarray::{concatenate, Array1, Array2, ArrayView1, Axis as NdAxis};
use serde::{Deserialize, Serialize};

use crate::error::{Axis, InvalidSelection, LaneError, Result};
use crate::time::Timestamp;

/// Value reported for an averaging bin no sample fell into.
pub const NO_DATA: f64 = f64::NAN;

// ---------------------------------------------------------------------------
// Polarization – a named per-channel product
// ---------------------------------------------------------------------------

/// Polarization product label.
///
/// The first eight can be stored in a record payload; the last three are
/// always derived from stored products.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Polarization {
    I,
    Q,
    U,
    V,
    XX,
    YY,
    XYRe,
    XYIm,
    FracV,
    XYAmp,
    XYPhase,
}

impl Polarization {
    pub const ALL: [Polarization; 11] = [
        Polarization::I,
        Polarization::Q,
        Polarization::U,
        Polarization::V,
        Polarization::XX,
        Polarization::YY,
        Polarization::XYRe,
        Polarization::XYIm,
        Polarization::FracV,
        Polarization::XYAmp,
        Polarization::XYPhase,
    ];

    /// Whether the product may appear in a record payload.
    pub fn is_storable(self) -> bool {
        !matches!(
            self,
            Polarization::FracV | Polarization::XYAmp | Polarization::XYPhase
        )
    }

    /// Products this one is computed from when it is not stored directly.
    fn inputs(self) -> &'static [Polarization] {
        use Polarization::*;
        match self {
            I | Q => &[XX, YY],
            U => &[XYRe],
            V => &[XYIm],
            FracV => &[V, I],
            XYAmp | XYPhase => &[U, V],
            XX | YY | XYRe | XYIm => &[],
        }
    }

    fn combine(self, a: f64, b: f64) -> f64 {
        use Polarization::*;
        match self {
            I => a + b,
            Q => a - b,
            U => 2.0 * a,
            V => -2.0 * a,
            FracV => a / b,
            XYAmp => a.hypot(b),
            XYPhase => b.atan2(a),
            XX | YY | XYRe | XYIm => a,
        }
    }
}

impl fmt::Display for Polarization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Polarization::I => "I",
            Polarization::Q => "Q",
            Polarization::U => "U",
            Polarization::V => "V",
            Polarization::XX => "XX",
            Polarization::YY => "YY",
            Polarization::XYRe => "XYRe",
            Polarization::XYIm => "XYIm",
            Polarization::FracV => "fracV",
            Polarization::XYAmp => "argXY",
            Polarization::XYPhase => "phaseXY",
        };
        f.write_str(label)
    }
}

impl FromStr for Polarization {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "i" => Ok(Polarization::I),
            "q" => Ok(Polarization::Q),
            "u" => Ok(Polarization::U),
            "v" => Ok(Polarization::V),
            "xx" => Ok(Polarization::XX),
            "yy" => Ok(Polarization::YY),
            "xyre" | "rexy" => Ok(Polarization::XYRe),
            "xyim" | "imxy" => Ok(Polarization::XYIm),
            "fracv" => Ok(Polarization::FracV),
            "argxy" | "xyamp" => Ok(Polarization::XYAmp),
            "phasexy" | "xyphase" => Ok(Polarization::XYPhase),
            other => Err(format!("unknown polarization product '{other}'")),
        }
    }
}

/// The products a lane can serve: what is stored plus what is derivable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolarizationSet {
    stored: Vec<Polarization>,
    available: BTreeSet<Polarization>,
}

impl PolarizationSet {
    pub fn from_stored(stored: &[Polarization]) -> Self {
        let mut available: BTreeSet<Polarization> = stored.iter().copied().collect();
        // Derivations chain (XX,YY -> I -> FracV), so iterate to a fixed point.
        loop {
            let before = available.len();
            for pol in Polarization::ALL {
                let inputs = pol.inputs();
                if !inputs.is_empty() && inputs.iter().all(|p| available.contains(p)) {
                    available.insert(pol);
                }
            }
            if available.len() == before {
                break;
            }
        }
        PolarizationSet {
            stored: stored.to_vec(),
            available,
        }
    }

    pub fn contains(&self, pol: Polarization) -> bool {
        self.available.contains(&pol)
    }

    pub fn stored(&self) -> &[Polarization] {
        &self.stored
    }

    pub fn iter(&self) -> impl Iterator<Item = Polarization> + '_ {
        self.available.iter().copied()
    }
}

impl fmt::Display for PolarizationSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let labels: Vec<String> = self.available.iter().map(|p| p.to_string()).collect();
        write!(f, "[{}]", labels.join(", "))
    }
}

// ---------------------------------------------------------------------------
// Record – one decoded unit of the stream
// ---------------------------------------------------------------------------

/// One decoded record: a spectrum per stored polarization product.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub timestamp: Timestamp,
    pub beam: u32,
    /// Channel indices covered, contiguous.
    pub channels: Range<u32>,
    /// Stored product → one value per channel.
    pub values: BTreeMap<Polarization, Vec<f64>>,
}

impl Record {
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Values of `pol`, computed from the stored products when necessary.
    pub fn product(&self, pol: Polarization) -> Option<Vec<f64>> {
        if let Some(v) = self.values.get(&pol) {
            return Some(v.clone());
        }
        match pol.inputs() {
            [] => None,
            [a] => {
                let a = self.product(*a)?;
                Some(a.into_iter().map(|x| pol.combine(x, 0.0)).collect())
            }
            [a, b, ..] => {
                let a = self.product(*a)?;
                let b = self.product(*b)?;
                Some(
                    a.into_iter()
                        .zip(b)
                        .map(|(x, y)| pol.combine(x, y))
                        .collect(),
                )
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Index and lane metadata
// ---------------------------------------------------------------------------

/// Header-only description of one record, held for the whole file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub timestamp: Timestamp,
    pub beam: u32,
    pub byte_offset: u64,
    pub byte_length: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BeamInfo {
    pub beam: u32,
    pub first_channel: u32,
    pub channel_count: u32,
    pub records: usize,
    /// `[lower edge of first channel, upper edge of last channel]` in MHz.
    pub freq_range: (f64, f64),
}

/// Structured summary returned by `Lane::info`.
#[derive(Debug, Clone, Serialize)]
pub struct LaneInfo {
    pub path: PathBuf,
    pub lane_id: Option<u32>,
    pub time_range: (Timestamp, Timestamp),
    /// MHz.
    pub freq_range: (f64, f64),
    pub channel_width_mhz: f64,
    pub beams: Vec<BeamInfo>,
    pub polarizations: PolarizationSet,
    pub record_count: usize,
    pub truncated_records: usize,
    pub truncated_bytes: u64,
}

impl LaneInfo {
    pub fn beam_ids(&self) -> Vec<u32> {
        self.beams.iter().map(|b| b.beam).collect()
    }

    pub fn beam(&self, beam: u32) -> Option<&BeamInfo> {
        self.beams.iter().find(|b| b.beam == beam)
    }
}

// ---------------------------------------------------------------------------
// SpecData – the engines' output
// ---------------------------------------------------------------------------

/// A dynamic spectrum: `data[[time_index, freq_index]]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpecData {
    /// Ascending.
    pub time: Vec<Timestamp>,
    /// Ascending, MHz.
    pub freq: Vec<f64>,
    #[serde(serialize_with = "serialize_rows")]
    pub data: Array2<f64>,
    pub polarization: Polarization,
    pub beam: u32,
}

fn serialize_rows<S: serde::Serializer>(data: &Array2<f64>, s: S) -> Result<S::Ok, S::Error> {
    use serde::ser::SerializeSeq;
    let mut seq = s.serialize_seq(Some(data.nrows()))?;
    for row in data.rows() {
        seq.serialize_element(&row.to_vec())?;
    }
    seq.end()
}

impl SpecData {
    /// (number of times, number of frequencies)
    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Seconds since the first time sample.
    pub fn relative_seconds(&self) -> Vec<f64> {
        match self.time.first() {
            Some(&t0) => self.time.iter().map(|t| t.seconds_since(t0)).collect(),
            None => Vec::new(),
        }
    }

    /// Data in decibels (`10 log10`).
    pub fn db(&self) -> Array2<f64> {
        self.data.mapv(|v| 10.0 * v.log10())
    }

    /// Same axes, data replaced by [`SpecData::db`].
    pub fn to_db(&self) -> SpecData {
        SpecData {
            data: self.db(),
            ..self.clone()
        }
    }

    fn with_data(&self, data: Array2<f64>) -> SpecData {
        SpecData {
            time: self.time.clone(),
            freq: self.freq.clone(),
            data,
            polarization: self.polarization,
            beam: self.beam,
        }
    }

    /// Reduce the samples with `start <= t <= end` (default: all of them) to
    /// one row, stamped halfway between the first and last of them.
    pub fn tmean(&self, range: Option<(Timestamp, Timestamp)>, method: Reduction) -> Result<SpecData> {
        if let Some((start, end)) = range {
            if end < start {
                return Err(InvalidSelection::Time(format!("start {start} is after end {end}")).into());
            }
        }
        let rows: Vec<usize> = (0..self.time.len())
            .filter(|&i| range.map_or(true, |(a, b)| a <= self.time[i] && self.time[i] <= b))
            .collect();
        let (Some(&first), Some(&last)) = (rows.first(), rows.last()) else {
            return Err(LaneError::EmptySelection { axis: Axis::Time });
        };

        let data = self.data.select(NdAxis(0), &rows);
        Ok(SpecData {
            time: vec![self.time[first].midpoint(self.time[last])],
            freq: self.freq.clone(),
            data: method.along(&data, NdAxis(0)).insert_axis(NdAxis(0)),
            polarization: self.polarization,
            beam: self.beam,
        })
    }

    /// Reduce the channels with `low <= f <= high` MHz (default: all of them)
    /// to one column at their mean frequency.
    pub fn fmean(&self, range: Option<(f64, f64)>, method: Reduction) -> Result<SpecData> {
        if let Some((low, high)) = range {
            if low.is_nan() || high.is_nan() || high < low {
                return Err(InvalidSelection::Frequency(format!("[{low}, {high}] is not a range")).into());
            }
        }
        let cols: Vec<usize> = (0..self.freq.len())
            .filter(|&j| range.map_or(true, |(a, b)| a <= self.freq[j] && self.freq[j] <= b))
            .collect();
        if cols.is_empty() {
            return Err(LaneError::EmptySelection { axis: Axis::Frequency });
        }

        let mean_freq = cols.iter().map(|&j| self.freq[j]).sum::<f64>() / cols.len() as f64;
        let data = self.data.select(NdAxis(1), &cols);
        Ok(SpecData {
            time: self.time.clone(),
            freq: vec![mean_freq],
            data: method.along(&data, NdAxis(1)).insert_axis(NdAxis(1)),
            polarization: self.polarization,
            beam: self.beam,
        })
    }

    /// Join two spectra of the same beam and product along time. The one
    /// that starts earlier goes first; the time axes must not overlap.
    pub fn concat_time(&self, other: &SpecData) -> Result<SpecData> {
        self.check_product(other)?;
        if self.beam != other.beam {
            return Err(LaneError::Incompatible(format!("beams {} and {}", self.beam, other.beam)));
        }
        if self.freq != other.freq {
            return Err(LaneError::Incompatible("frequency axes differ".to_string()));
        }
        let (a, b) = match (self.time.last(), other.time.first(), other.time.last(), self.time.first()) {
            (None, ..) => return Ok(other.clone()),
            (_, None, ..) => return Ok(self.clone()),
            (Some(end), Some(start), ..) if end < start => (self, other),
            (_, _, Some(end), Some(start)) if end < start => (other, self),
            _ => return Err(LaneError::Incompatible("time axes overlap".to_string())),
        };
        let data = concatenate(NdAxis(0), &[a.data.view(), b.data.view()])
            .map_err(|e| LaneError::Incompatible(e.to_string()))?;
        Ok(SpecData {
            time: a.time.iter().chain(&b.time).copied().collect(),
            freq: self.freq.clone(),
            data,
            polarization: self.polarization,
            beam: self.beam,
        })
    }

    /// Join two spectra of the same beam and product along frequency. The
    /// lower band goes first; the frequency axes must not overlap.
    pub fn concat_freq(&self, other: &SpecData) -> Result<SpecData> {
        self.check_product(other)?;
        if self.beam != other.beam {
            return Err(LaneError::Incompatible(format!("beams {} and {}", self.beam, other.beam)));
        }
        if self.time != other.time {
            return Err(LaneError::Incompatible("time axes differ".to_string()));
        }
        let (a, b) = match (self.freq.last(), other.freq.first(), other.freq.last(), self.freq.first()) {
            (None, ..) => return Ok(other.clone()),
            (_, None, ..) => return Ok(self.clone()),
            (Some(high), Some(low), ..) if high < low => (self, other),
            (_, _, Some(high), Some(low)) if high < low => (other, self),
            _ => return Err(LaneError::Incompatible("frequency axes overlap".to_string())),
        };
        let data = concatenate(NdAxis(1), &[a.data.view(), b.data.view()])
            .map_err(|e| LaneError::Incompatible(e.to_string()))?;
        Ok(SpecData {
            time: self.time.clone(),
            freq: a.freq.iter().chain(&b.freq).copied().collect(),
            data,
            polarization: self.polarization,
            beam: self.beam,
        })
    }

    fn check_product(&self, other: &SpecData) -> Result<()> {
        if self.polarization != other.polarization {
            return Err(LaneError::Incompatible(format!(
                "polarizations {} and {}",
                self.polarization, other.polarization
            )));
        }
        Ok(())
    }

    /// Same product on the same grid. Beams may differ (on-source minus
    /// off-source is a common use).
    fn check_conformity(&self, other: &SpecData) -> Result<()> {
        self.check_product(other)?;
        if self.shape() != other.shape() {
            return Err(LaneError::Incompatible(format!(
                "shapes {:?} and {:?}",
                self.shape(),
                other.shape()
            )));
        }
        if self.time != other.time {
            return Err(LaneError::Incompatible("time axes differ".to_string()));
        }
        if self.freq != other.freq {
            return Err(LaneError::Incompatible("frequency axes differ".to_string()));
        }
        Ok(())
    }

    /// Percentile (0–100) of the finite values, `None` if there are none.
    pub fn percentile(&self, q: f64) -> Option<f64> {
        percentile(self.data.iter().copied(), q)
    }
}

// Element-wise arithmetic. Two spectra must share product and axes, so
// `&a + &b` is fallible; a scalar always applies.
macro_rules! impl_spec_arith {
    ($trait:ident, $method:ident, $op:tt) => {
        impl $trait<&SpecData> for &SpecData {
            type Output = Result<SpecData>;

            fn $method(self, rhs: &SpecData) -> Result<SpecData> {
                self.check_conformity(rhs)?;
                Ok(self.with_data(&self.data $op &rhs.data))
            }
        }

        impl $trait<f64> for &SpecData {
            type Output = SpecData;

            fn $method(self, rhs: f64) -> SpecData {
                self.with_data(self.data.mapv(|v| v $op rhs))
            }
        }

        impl $trait<f64> for SpecData {
            type Output = SpecData;

            fn $method(mut self, rhs: f64) -> SpecData {
                self.data.mapv_inplace(|v| v $op rhs);
                self
            }
        }
    };
}

impl_spec_arith!(Add, add, +);
impl_spec_arith!(Sub, sub, -);
impl_spec_arith!(Mul, mul, *);
impl_spec_arith!(Div, div, /);

/// How [`SpecData::tmean`] and [`SpecData::fmean`] reduce an axis.
/// `NO_DATA` and other non-finite cells are skipped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Reduction {
    #[default]
    Mean,
    Median,
}

impl Reduction {
    fn apply(self, lane: ArrayView1<'_, f64>) -> f64 {
        match self {
            Reduction::Mean => {
                let (sum, n) = lane
                    .iter()
                    .filter(|v| v.is_finite())
                    .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
                if n == 0 {
                    NO_DATA
                } else {
                    sum / n as f64
                }
            }
            Reduction::Median => percentile(lane.iter().copied(), 50.0).unwrap_or(NO_DATA),
        }
    }

    fn along(self, data: &Array2<f64>, axis: NdAxis) -> Array1<f64> {
        data.map_axis(axis, |lane| self.apply(lane))
    }
}

pub(crate) fn percentile(values: impl Iterator<Item = f64>, q: f64) -> Option<f64> {
    let mut finite: Vec<f64> = values.filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return None;
    }
    finite.sort_by(|a, b| a.total_cmp(b));
    let rank = (q.clamp(0.0, 100.0) / 100.0) * (finite.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    Some(finite[lo] + (finite[hi] - finite[lo]) * frac)
}
