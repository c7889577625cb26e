/// Data layer: record layout, indexing, selection and rebinning.
///
/// Architecture:
/// ```text
///   lane file (.spectra)
///        │
///        ▼
///   ┌──────────┐   ┌────────┐
///   │  index    │◄──│ codec  │  headers only → StreamIndex
///   └──────────┘   └────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  lane     │  Lane + lazy RecordQuery (one record in memory)
///   └──────────┘
///        │
///        ├──────────────┐
///        ▼              ▼
///   ┌──────────┐   ┌──────────┐
///   │  select   │   │ average  │  → SpecData
///   └──────────┘   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  export   │  parquet / json / csv / png
///   └──────────┘
/// ```

pub mod average;
pub mod codec;
pub mod export;
pub mod index;
pub mod lane;
pub mod layout;
pub mod model;
pub mod select;
pub mod writer;
