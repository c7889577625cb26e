use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use lane_spectra::data::codec::RecordCodec;
use lane_spectra::data::model::Record;
use lane_spectra::data::writer::SpectraWriter;
use lane_spectra::error::LaneError;
use lane_spectra::{Binning, Lane, Polarization, RecordLayout, Selection, Timestamp};

const SECOND: i64 = 1_000_000_000;

fn start() -> Timestamp {
    lane_spectra::time::parse_time("2019-10-03T07:20:55", None).unwrap()
}

fn record(timestamp: Timestamp) -> Record {
    Record {
        timestamp,
        beam: 0,
        channels: 200..392,
        values: [(Polarization::I, (200..392).map(f64::from).collect())]
            .into_iter()
            .collect(),
    }
}

/// 300 records at 1 s from 07:20:55, then one at 07:25:54.4404020;
/// channels 200..392 (39.0625–76.5625 MHz); I = channel number.
fn write_lane(dir: &Path) -> PathBuf {
    let path = dir.join("20191003_072055_2.spectra");
    let mut writer = SpectraWriter::create(&path, RecordLayout::default()).unwrap();
    for i in 0..300 {
        writer.write_record(&record(start().offset_nanos(i * SECOND))).unwrap();
    }
    let last = lane_spectra::time::parse_time("2019-10-03T07:25:54.4404020", None).unwrap();
    writer.write_record(&record(last)).unwrap();
    writer.finish().unwrap()
}

fn append(path: &Path, bytes: &[u8]) {
    let mut file = OpenOptions::new().append(true).open(path).unwrap();
    file.write_all(bytes).unwrap();
}

#[test]
fn lane_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let lane = Lane::open(write_lane(dir.path())).unwrap();
    let info = lane.info();

    assert_eq!(info.lane_id, Some(2));
    assert_eq!(info.time_range.0.iso(), "2019-10-03T07:20:55.0000000");
    assert_eq!(info.time_range.1.iso(), "2019-10-03T07:25:54.4404020");
    assert_eq!(info.freq_range, (39.0625, 76.5625));
    assert_eq!(info.beam_ids(), vec![0]);
    assert_eq!(info.record_count, 301);
    assert_eq!(info.truncated_records, 0);
}

#[test]
fn select_burst_window() {
    let dir = tempfile::tempdir().unwrap();
    let lane = Lane::open(write_lane(dir.path())).unwrap();
    let t0 = lane.parse_time("07:25:50.4404020").unwrap();
    let t1 = lane.parse_time("07:25:54.4404020").unwrap();

    let selection = Selection::default()
        .time(t0, t1)
        .freq(50.0, 54.97)
        .beam(0)
        .polarization(Polarization::I);
    let spec = lane.select(&selection).unwrap();

    assert_eq!(spec.shape(), (5, 26));
    assert!(spec.freq.iter().all(|&f| (50.0..=54.97).contains(&f)));
    assert!(spec.time.iter().all(|&t| t0 <= t && t <= t1));
    assert_eq!(spec.freq[0], 50.0);
    assert_eq!(spec.data[[0, 0]], 256.0);
    assert_eq!(spec.data[[4, 25]], 281.0);
    assert_eq!(spec.time[4], t1);
}

#[test]
fn average_past_the_end_is_no_data() {
    let dir = tempfile::tempdir().unwrap();
    let lane = Lane::open(write_lane(dir.path())).unwrap();
    let t0 = lane.parse_time("07:25:50.4404020").unwrap();
    let t1 = lane.parse_time("08:00:00.000").unwrap();

    let selection = Selection::default().time(t0, t1).freq(30.0, 60.0).beam(0);
    let spec = lane.average(&selection, &Binning::new(Some(3.0), Some(2.0))).unwrap();

    // 07:25:51 .. 08:00:00 in 3 s bins, 39.0625 .. 60 MHz in 2 MHz bins
    assert_eq!(spec.shape(), (683, 11));
    assert_eq!(spec.time[0], start().offset_nanos(296 * SECOND));
    assert_eq!(spec.freq[0], 39.0625);

    // channels 200..=210 land in the first frequency bin
    assert_eq!(spec.data[[0, 0]], 205.0);
    assert!(spec.data.row(1).iter().all(|v| v.is_finite()));
    for row in 2..683 {
        assert!(spec.data.row(row).iter().all(|v| v.is_nan()), "row {row} should be no data");
    }
}

#[test]
fn repeated_calls_are_bit_identical() {
    let dir = tempfile::tempdir().unwrap();
    let lane = Lane::open(write_lane(dir.path())).unwrap();
    let selection = Selection::default().freq(45.0, 70.0);
    let binning = Binning::new(Some(7.5), Some(1.3));

    let bits = |spec: &lane_spectra::SpecData| spec.data.iter().map(|v| v.to_bits()).collect::<Vec<_>>();

    let a = lane.select(&selection).unwrap();
    let b = lane.select(&selection).unwrap();
    assert_eq!(a.time, b.time);
    assert_eq!(bits(&a), bits(&b));

    let a = lane.average(&selection, &binning).unwrap();
    let b = lane.average(&selection, &binning).unwrap();
    assert_eq!(a.time, b.time);
    assert_eq!(a.freq, b.freq);
    assert_eq!(bits(&a), bits(&b));
}

#[test]
fn full_average_matches_selection_mean() {
    let dir = tempfile::tempdir().unwrap();
    let lane = Lane::open(write_lane(dir.path())).unwrap();
    let selection = Selection::default().freq(60.0, 65.0);

    let full = lane.select(&selection).unwrap();
    let mean = full.data.iter().sum::<f64>() / full.data.len() as f64;
    let averaged = lane.average(&selection, &Binning::full()).unwrap();

    assert_eq!(averaged.shape(), (1, 1));
    assert!((averaged.data[[0, 0]] - mean).abs() < 1e-9 * mean);
}

#[test]
fn full_width_bins_match_selection_mean() {
    let dir = tempfile::tempdir().unwrap();
    let lane = Lane::open(write_lane(dir.path())).unwrap();
    let t0 = start();
    let t1 = start().offset_nanos(299 * SECOND);
    // 60.05 MHz falls inside channel 307 (59.9609–60.1563 MHz)
    let selection = Selection::default().time(t0, t1).freq(60.05, 65.0);

    let full = lane.select(&selection).unwrap();
    assert_eq!(full.freq[0], 307.0 * 0.1953125);
    let mean = full.data.iter().sum::<f64>() / full.data.len() as f64;

    let averaged = lane
        .average(&selection, &Binning::new(Some(t1.seconds_since(t0)), Some(65.0 - 60.05)))
        .unwrap();
    assert_eq!(averaged.shape(), (1, 1));
    assert_eq!(averaged.time, vec![t0]);
    assert_eq!(averaged.freq, vec![full.freq[0]]);
    assert!((averaged.data[[0, 0]] - mean).abs() < 1e-9 * mean);
}

#[test]
fn queries_restart_from_the_top() {
    let dir = tempfile::tempdir().unwrap();
    let lane = Lane::open(write_lane(dir.path())).unwrap();
    let (t0, t1) = lane.time_range();
    let query = lane.records_in(t0, t1, &[0]);

    let first: Vec<Timestamp> = query.iter().unwrap().map(|r| r.unwrap().timestamp).collect();
    let second: Vec<Timestamp> = query.iter().unwrap().map(|r| r.unwrap().timestamp).collect();
    assert_eq!(first.len(), 301);
    assert_eq!(first, second);
    assert_eq!(first, query.timestamps().collect::<Vec<_>>());
}

#[test]
fn truncated_tail_is_reported_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_lane(dir.path());
    let codec = RecordCodec::new(RecordLayout::default()).unwrap();
    let tail = codec.encode(&record(start().offset_nanos(400 * SECOND))).unwrap();
    append(&path, &tail[..100]);

    let lane = Lane::open(&path).unwrap();
    let info = lane.info();
    assert_eq!(info.record_count, 301);
    assert_eq!(info.truncated_records, 1);
    assert_eq!(info.truncated_bytes, 100);
    assert_eq!(lane.select(&Selection::default()).unwrap().shape(), (301, 192));
}

#[test]
fn oversized_length_claim_is_corrupt() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_lane(dir.path());
    let codec = RecordCodec::new(RecordLayout::default()).unwrap();
    let mut bad = codec.encode(&record(start().offset_nanos(400 * SECOND))).unwrap();
    bad[4..8].copy_from_slice(&u32::MAX.to_le_bytes());
    append(&path, &bad);

    let err = Lane::open(&path).unwrap_err();
    assert!(matches!(err, LaneError::CorruptStream { .. }), "{err}");
}

#[test]
fn file_changed_after_open_is_detected() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_lane(dir.path());
    let lane = Lane::open(&path).unwrap();
    append(&path, &[0u8; 16]);

    let err = lane.select(&Selection::default()).unwrap_err();
    assert!(matches!(err, LaneError::CorruptStream { .. }), "{err}");
}
