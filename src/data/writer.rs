use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use super::codec::RecordCodec;
use super::layout::RecordLayout;
use super::model::Record;
use crate::error::{LaneError, Result};

/// Appends records to a lane file in a given layout.
pub struct SpectraWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    codec: RecordCodec,
    records_written: usize,
}

impl SpectraWriter {
    pub fn create(path: &Path, layout: RecordLayout) -> Result<Self> {
        let codec = RecordCodec::new(layout)?;
        let file = File::create(path).map_err(|e| LaneError::io(path, e))?;
        Ok(SpectraWriter {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            codec,
            records_written: 0,
        })
    }

    pub fn write_record(&mut self, record: &Record) -> Result<()> {
        let bytes = self.codec.encode(record)?;
        self.writer
            .write_all(&bytes)
            .map_err(|e| LaneError::io(&self.path, e))?;
        self.records_written += 1;
        Ok(())
    }

    pub fn records_written(&self) -> usize {
        self.records_written
    }

    pub fn finish(mut self) -> Result<PathBuf> {
        self.writer.flush().map_err(|e| LaneError::io(&self.path, e))?;
        log::debug!("wrote {} records to {}", self.records_written, self.path.display());
        Ok(self.path)
    }
}
