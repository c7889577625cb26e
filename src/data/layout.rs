use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::model::Polarization;
use crate::error::{LaneError, Result};

/// Sync word opening every record of the default layout ("SPEC").
pub const DEFAULT_SYNC_WORD: u64 = 0x5350_4543;
/// 200 MHz sampled into 1024 channels.
pub const DEFAULT_CHANNEL_WIDTH_MHZ: f64 = 200.0 / 1024.0;
pub const DEFAULT_CHANNELS_PER_RECORD: u32 = 192;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endianness {
    Little,
    Big,
}

/// Numeric encoding of payload samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SampleEncoding {
    F32,
    F64,
    /// Fixed point: value = raw × scale.
    I16 { scale: f64 },
    I32 { scale: f64 },
}

impl SampleEncoding {
    pub fn width(self) -> usize {
        match self {
            SampleEncoding::I16 { .. } => 2,
            SampleEncoding::F32 | SampleEncoding::I32 { .. } => 4,
            SampleEncoding::F64 => 8,
        }
    }
}

/// Unit of the raw header timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Nanoseconds,
    Microseconds,
    Seconds,
}

impl TimeUnit {
    pub fn nanos_per_tick(self) -> i64 {
        match self {
            TimeUnit::Nanoseconds => 1,
            TimeUnit::Microseconds => 1_000,
            TimeUnit::Seconds => 1_000_000_000,
        }
    }
}

/// An unsigned integer header field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub offset: usize,
    /// Bytes, 1 to 8.
    pub width: usize,
}

impl Field {
    pub const fn new(offset: usize, width: usize) -> Self {
        Field { offset, width }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncWord {
    pub field: Field,
    pub value: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderLayout {
    /// Header size in bytes; the payload starts right after it.
    pub length: usize,
    pub sync: Option<SyncWord>,
    pub record_length: Field,
    pub timestamp: Field,
    pub beam: Field,
    pub first_channel: Field,
    pub channel_count: Field,
}

impl Default for HeaderLayout {
    fn default() -> Self {
        HeaderLayout {
            length: 32,
            sync: Some(SyncWord {
                field: Field::new(0, 4),
                value: DEFAULT_SYNC_WORD,
            }),
            record_length: Field::new(4, 4),
            timestamp: Field::new(8, 8),
            beam: Field::new(16, 4),
            first_channel: Field::new(20, 4),
            channel_count: Field::new(24, 4),
        }
    }
}

/// Everything needed to decode a lane file: header fields, payload shape,
/// numeric encoding and the channel-to-frequency mapping.
///
/// Fields missing from a JSON layout take their [`Default`] values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordLayout {
    pub byte_order: Endianness,
    pub header: HeaderLayout,
    pub channels_per_record: u32,
    /// Stored products, in payload order.
    pub polarizations: Vec<Polarization>,
    pub encoding: SampleEncoding,
    pub time_unit: TimeUnit,
    pub channel_width_mhz: f64,
    pub frequency_offset_mhz: f64,
}

impl Default for RecordLayout {
    fn default() -> Self {
        RecordLayout {
            byte_order: Endianness::Little,
            header: HeaderLayout::default(),
            channels_per_record: DEFAULT_CHANNELS_PER_RECORD,
            polarizations: vec![Polarization::I],
            encoding: SampleEncoding::F32,
            time_unit: TimeUnit::Nanoseconds,
            channel_width_mhz: DEFAULT_CHANNEL_WIDTH_MHZ,
            frequency_offset_mhz: 0.0,
        }
    }
}

impl RecordLayout {
    pub fn from_json_str(text: &str) -> Result<Self> {
        let layout: RecordLayout = serde_json::from_str(text)
            .map_err(|e| LaneError::InvalidLayout(format!("parsing layout JSON: {e}")))?;
        layout.validate()?;
        Ok(layout)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| LaneError::io(path, e))?;
        Self::from_json_str(&text)
    }

    /// Total bytes of one record, header included.
    pub fn record_len(&self) -> usize {
        self.header.length + self.payload_len()
    }

    pub fn payload_len(&self) -> usize {
        self.polarizations.len() * self.channels_per_record as usize * self.encoding.width()
    }

    /// Lower edge of `channel`, MHz.
    pub fn channel_frequency(&self, channel: u32) -> f64 {
        self.frequency_offset_mhz + channel as f64 * self.channel_width_mhz
    }

    pub fn validate(&self) -> Result<()> {
        let header = &self.header;
        let mut fields = vec![
            ("record_length", header.record_length),
            ("timestamp", header.timestamp),
            ("beam", header.beam),
            ("first_channel", header.first_channel),
            ("channel_count", header.channel_count),
        ];
        if let Some(sync) = header.sync {
            fields.push(("sync", sync.field));
            if sync.field.width < 8 && sync.value >> (8 * sync.field.width) != 0 {
                return Err(LaneError::InvalidLayout(format!(
                    "sync value {:#x} does not fit in {} bytes",
                    sync.value, sync.field.width
                )));
            }
        }
        for (name, field) in fields {
            if !(1..=8).contains(&field.width) {
                return Err(LaneError::InvalidLayout(format!(
                    "header field '{name}' has width {}, expected 1 to 8 bytes",
                    field.width
                )));
            }
            if field.offset + field.width > header.length {
                return Err(LaneError::InvalidLayout(format!(
                    "header field '{name}' ends at byte {}, past the {}-byte header",
                    field.offset + field.width,
                    header.length
                )));
            }
        }

        if self.channels_per_record == 0 {
            return Err(LaneError::InvalidLayout("channels_per_record must be positive".into()));
        }
        if self.polarizations.is_empty() {
            return Err(LaneError::InvalidLayout("at least one polarization product is required".into()));
        }
        let unique: BTreeSet<_> = self.polarizations.iter().collect();
        if unique.len() != self.polarizations.len() {
            return Err(LaneError::InvalidLayout("polarization products must be distinct".into()));
        }
        if let Some(p) = self.polarizations.iter().find(|p| !p.is_storable()) {
            return Err(LaneError::InvalidLayout(format!("{p} is derived and cannot be stored")));
        }
        if let SampleEncoding::I16 { scale } | SampleEncoding::I32 { scale } = self.encoding {
            if !(scale.is_finite() && scale != 0.0) {
                return Err(LaneError::InvalidLayout(format!("fixed-point scale {scale} is unusable")));
            }
        }
        if !(self.channel_width_mhz.is_finite() && self.channel_width_mhz > 0.0) {
            return Err(LaneError::InvalidLayout(format!(
                "channel width {} MHz must be positive",
                self.channel_width_mhz
            )));
        }
        if !self.frequency_offset_mhz.is_finite() {
            return Err(LaneError::InvalidLayout("frequency offset must be finite".into()));
        }
        if u32::try_from(self.record_len()).is_err() {
            return Err(LaneError::InvalidLayout("record length exceeds 4 GiB".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_layout_is_valid() {
        let layout = RecordLayout::default();
        layout.validate().unwrap();
        assert_eq!(layout.record_len(), 32 + 192 * 4);
        assert_eq!(layout.channel_frequency(200), 39.0625);
    }

    #[test]
    fn layout_loads_from_json() {
        let json = r#"{
            "byte_order": "big",
            "header": {
                "length": 24,
                "sync": null,
                "record_length": {"offset": 0, "width": 4},
                "timestamp": {"offset": 4, "width": 8},
                "beam": {"offset": 12, "width": 2},
                "first_channel": {"offset": 14, "width": 2},
                "channel_count": {"offset": 16, "width": 4}
            },
            "channels_per_record": 16,
            "polarizations": ["I", "Q", "U", "V"],
            "encoding": {"type": "i16", "scale": 0.5},
            "time_unit": "microseconds",
            "channel_width_mhz": 0.1953125,
            "frequency_offset_mhz": 0.0
        }"#;
        let layout = RecordLayout::from_json_str(json).unwrap();
        assert_eq!(layout.byte_order, Endianness::Big);
        assert_eq!(layout.encoding, SampleEncoding::I16 { scale: 0.5 });
        assert_eq!(layout.record_len(), 24 + 4 * 16 * 2);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let layout =
            RecordLayout::from_json_str(r#"{"polarizations": ["XX", "YY"], "encoding": {"type": "f64"}}"#)
                .unwrap();
        assert_eq!(layout.header, HeaderLayout::default());
        assert_eq!(layout.channels_per_record, DEFAULT_CHANNELS_PER_RECORD);
        assert_eq!(layout.record_len(), 32 + 2 * 192 * 8);
    }

    #[test]
    fn field_past_header_is_rejected() {
        let mut layout = RecordLayout::default();
        layout.header.channel_count = Field::new(30, 4);
        assert!(matches!(layout.validate(), Err(LaneError::InvalidLayout(_))));
    }

    #[test]
    fn derived_products_cannot_be_stored() {
        let layout = RecordLayout {
            polarizations: vec![Polarization::I, Polarization::FracV],
            ..RecordLayout::default()
        };
        assert!(layout.validate().is_err());
    }
}
