//! Reader and rebinning engine for time-frequency "lane" files.
//!
//! A lane file is a flat sequence of fixed-layout records, each carrying one
//! spectrum of one beam at one timestamp. [`Lane`] indexes the headers once and
//! serves restartable, time-ordered record queries; [`Lane::select`] and
//! [`Lane::average`] turn a query into a dense [`SpecData`].

pub mod color;
pub mod data;
pub mod error;
pub mod time;

pub use data::average::Binning;
pub use data::lane::Lane;
pub use data::layout::RecordLayout;
pub use data::model::{Polarization, Reduction, SpecData, NO_DATA};
pub use data::select::Selection;
pub use error::{LaneError, Result};
pub use time::Timestamp;
