use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use arrow::array::{Float64Builder, Int64Array, ListBuilder, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;

use super::model::SpecData;
use crate::color;

// ---------------------------------------------------------------------------
// Public entry-point
// ---------------------------------------------------------------------------

/// Write a dynamic spectrum to a file.  Dispatch by extension.
///
/// Supported formats:
/// * `.parquet` – one row per time sample: `time_ns`, `time_iso`, `freq`, `data`
/// * `.json`    – the serialized `SpecData`, no-data cells as `null`
/// * `.csv`     – `time_iso` then one column per frequency, empty for no data
/// * `.png`     – the rendered heatmap, low frequencies at the bottom
pub fn save_spec(spec: &SpecData, path: &Path) -> Result<()> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    match ext.as_str() {
        "parquet" | "pq" => save_parquet(spec, path),
        "json" => save_json(spec, path),
        "csv" => save_csv(spec, path),
        "png" => save_png(spec, path),
        other => bail!("Unsupported output extension: .{other}"),
    }
    .with_context(|| format!("writing {}", path.display()))?;

    log::info!(
        "saved {} x {} spectrum to {}",
        spec.time.len(),
        spec.freq.len(),
        path.display()
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// JSON
// ---------------------------------------------------------------------------

fn save_json(spec: &SpecData, path: &Path) -> Result<()> {
    let file = File::create(path).context("creating JSON file")?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, spec).context("serializing spectrum")?;
    writer.flush().context("flushing JSON")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// CSV
// ---------------------------------------------------------------------------

fn save_csv(spec: &SpecData, path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path).context("creating CSV")?;

    let mut header = Vec::with_capacity(spec.freq.len() + 1);
    header.push("time_iso".to_string());
    header.extend(spec.freq.iter().map(|f| f.to_string()));
    writer.write_record(&header).context("writing CSV header")?;

    for (t, row) in spec.time.iter().zip(spec.data.rows()) {
        let mut fields = Vec::with_capacity(row.len() + 1);
        fields.push(t.iso());
        fields.extend(row.iter().map(|v| if v.is_nan() { String::new() } else { v.to_string() }));
        writer
            .write_record(&fields)
            .with_context(|| format!("CSV row {t}"))?;
    }
    writer.flush().context("flushing CSV")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Parquet
// ---------------------------------------------------------------------------

fn save_parquet(spec: &SpecData, path: &Path) -> Result<()> {
    let item = || Arc::new(Field::new("item", DataType::Float64, true));
    let schema = Arc::new(Schema::new(vec![
        Field::new("time_ns", DataType::Int64, false),
        Field::new("time_iso", DataType::Utf8, false),
        Field::new("freq", DataType::List(item()), false),
        Field::new("data", DataType::List(item()), false),
    ]));

    let time_ns = Int64Array::from(spec.time.iter().map(|t| t.as_nanos()).collect::<Vec<_>>());
    let time_iso = StringArray::from(spec.time.iter().map(|t| t.iso()).collect::<Vec<_>>());

    let mut freq_builder = ListBuilder::new(Float64Builder::new());
    let mut data_builder = ListBuilder::new(Float64Builder::new());
    for row in spec.data.rows() {
        freq_builder.values().append_slice(&spec.freq);
        freq_builder.append(true);

        let values = data_builder.values();
        for &v in row {
            if v.is_nan() {
                values.append_null();
            } else {
                values.append_value(v);
            }
        }
        data_builder.append(true);
    }

    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(time_ns),
            Arc::new(time_iso),
            Arc::new(freq_builder.finish()),
            Arc::new(data_builder.finish()),
        ],
    )
    .context("building record batch")?;

    let file = File::create(path).context("creating parquet file")?;
    let mut writer = ArrowWriter::try_new(file, schema, None).context("creating parquet writer")?;
    writer.write(&batch).context("writing parquet batch")?;
    writer.close().context("closing parquet writer")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// PNG
// ---------------------------------------------------------------------------

fn save_png(spec: &SpecData, path: &Path) -> Result<()> {
    if spec.is_empty() {
        bail!("nothing to render: spectrum is {} x {}", spec.time.len(), spec.freq.len());
    }
    let rendered = color::render(spec, &color::ColorScale::from_spec(spec));
    image::save_buffer(
        path,
        &rendered.pixels,
        rendered.width as u32,
        rendered.height as u32,
        image::ExtendedColorType::Rgb8,
    )
    .context("encoding PNG")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use arrow::array::{Array, AsArray};
    use arrow::datatypes::Float64Type;
    use ndarray::array;
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

    use super::*;
    use crate::data::model::{Polarization, NO_DATA};
    use crate::time::Timestamp;

    fn spec() -> SpecData {
        SpecData {
            time: vec![Timestamp::from_nanos(0), Timestamp::from_nanos(1_500_000_000)],
            freq: vec![50.0, 50.25, 50.5],
            data: array![[1.0, 2.0, 3.0], [4.0, NO_DATA, 6.0]],
            polarization: Polarization::I,
            beam: 0,
        }
    }

    #[test]
    fn csv_leaves_no_data_cells_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        save_spec(&spec(), &path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "time_iso,50,50.25,50.5");
        assert_eq!(lines[2], "1970-01-01T00:00:01.5000000,4,,6");
    }

    #[test]
    fn json_writes_no_data_as_null() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        save_spec(&spec(), &path).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["data"][1][1], serde_json::Value::Null);
        assert_eq!(value["data"][1][2], 6.0);
        assert_eq!(value["time"][1], 1_500_000_000i64);
    }

    #[test]
    fn parquet_has_one_row_per_time_sample() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.parquet");
        save_spec(&spec(), &path).unwrap();

        let file = File::open(&path).unwrap();
        let reader = ParquetRecordBatchReaderBuilder::try_new(file).unwrap().build().unwrap();
        let batches: Vec<RecordBatch> = reader.map(|b| b.unwrap()).collect();
        assert_eq!(batches.iter().map(|b| b.num_rows()).sum::<usize>(), 2);

        let batch = &batches[0];
        let data = batch.column_by_name("data").unwrap().as_list::<i32>();
        let second = data.value(1);
        let second = second.as_primitive::<Float64Type>();
        assert_eq!(second.len(), 3);
        assert!(second.is_null(1));
        assert_eq!(second.value(2), 6.0);
    }

    #[test]
    fn png_has_one_pixel_per_cell() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.png");
        save_spec(&spec(), &path).unwrap();

        let img = image::open(&path).unwrap();
        assert_eq!((img.width(), img.height()), (2, 3));
    }

    #[test]
    fn unknown_extension_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        assert!(save_spec(&spec(), &dir.path().join("out.fits")).is_err());
    }
}
