use std::path::Path;

use anyhow::{bail, Context, Result};
use eframe::egui;

use lane_spectra::color::{self, ColorScale};
use lane_spectra::data::average::Binning;
use lane_spectra::data::lane::Lane;
use lane_spectra::data::layout::RecordLayout;
use lane_spectra::data::model::{Polarization, SpecData};
use lane_spectra::data::select::Selection;

// ---------------------------------------------------------------------------
// Selection form – what the user typed
// ---------------------------------------------------------------------------

/// Text-level request, filled from the command line or the side panel.
/// Empty strings mean "whole lane".
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionForm {
    pub time_start: String,
    pub time_end: String,
    pub freq_low: String,
    pub freq_high: String,
    pub beam: Option<u32>,
    pub polarization: Polarization,
    pub average: bool,
    pub dt: String,
    pub df: String,
    pub db: bool,
}

impl Default for SelectionForm {
    fn default() -> Self {
        Self {
            time_start: String::new(),
            time_end: String::new(),
            freq_low: String::new(),
            freq_high: String::new(),
            beam: None,
            polarization: Polarization::I,
            average: false,
            dt: String::new(),
            df: String::new(),
            db: false,
        }
    }
}

fn parse_optional_f64(text: &str, what: &str) -> Result<Option<f64>> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    let value = text
        .parse::<f64>()
        .with_context(|| format!("{what}: '{text}' is not a number"))?;
    Ok(Some(value))
}

impl SelectionForm {
    /// Turn the form into a selection against `lane`.
    pub fn selection(&self, lane: &Lane) -> Result<Selection> {
        let mut selection = Selection::default().polarization(self.polarization);
        if let Some(beam) = self.beam {
            selection = selection.beam(beam);
        }

        let (lane_t0, lane_t1) = lane.time_range();
        let start = self.time_start.trim();
        let end = self.time_end.trim();
        if !start.is_empty() || !end.is_empty() {
            let t0 = if start.is_empty() { lane_t0 } else { lane.parse_time(start)? };
            let t1 = if end.is_empty() { lane_t1 } else { lane.parse_time(end)? };
            selection = selection.time(t0, t1);
        }

        let low = parse_optional_f64(&self.freq_low, "low frequency")?;
        let high = parse_optional_f64(&self.freq_high, "high frequency")?;
        if low.is_some() || high.is_some() {
            let (lane_f0, lane_f1) = lane.freq_range();
            selection = selection.freq(low.unwrap_or(lane_f0), high.unwrap_or(lane_f1));
        }
        Ok(selection)
    }

    pub fn binning(&self) -> Result<Option<Binning>> {
        let dt = parse_optional_f64(&self.dt, "dt")?;
        let df = parse_optional_f64(&self.df, "df")?;
        if !self.average && (dt.is_some() || df.is_some()) {
            log::warn!("dt/df given without averaging; ignoring them");
        }
        Ok(self.average.then(|| Binning::new(dt, df)))
    }

    /// Run the selection (and averaging, if asked) against `lane`.
    pub fn compute(&self, lane: &Lane) -> Result<SpecData> {
        let selection = self.selection(lane)?;
        let spec = match self.binning()? {
            Some(binning) => lane.average(&selection, &binning)?,
            None => lane.select(&selection)?,
        };
        Ok(if self.db { spec.to_db() } else { spec })
    }
}

// ---------------------------------------------------------------------------
// Application state
// ---------------------------------------------------------------------------

/// The full UI state, independent of rendering.
#[derive(Default)]
pub struct AppState {
    /// Open lane (None until the user loads a file).
    pub lane: Option<Lane>,

    /// Layout used to open lanes.
    pub layout: RecordLayout,

    pub form: SelectionForm,

    /// Last computed spectrum.
    pub spec: Option<SpecData>,

    /// Colour range of `spec`.
    pub scale: Option<ColorScale>,

    /// GPU copy of the rendered `spec`; dropped whenever `spec` changes.
    pub texture: Option<egui::TextureHandle>,

    /// Status / error message shown in the UI.
    pub status_message: Option<String>,
}

impl AppState {
    pub fn new(layout: RecordLayout, form: SelectionForm) -> Self {
        Self {
            layout,
            form,
            ..Self::default()
        }
    }

    /// Open `path` and show its default selection.
    pub fn open_lane(&mut self, path: &Path) {
        match Lane::open_with_layout(path, self.layout.clone()) {
            Ok(lane) => {
                if self.form.beam.is_some_and(|b| lane.index().beam(b).is_none()) {
                    self.form.beam = None;
                }
                self.lane = Some(lane);
                self.status_message = None;
                self.apply();
            }
            Err(e) => {
                log::error!("Failed to open {}: {e}", path.display());
                self.status_message = Some(format!("Error: {e}"));
            }
        }
    }

    /// Recompute the spectrum from the form.
    pub fn apply(&mut self) {
        let Some(lane) = &self.lane else {
            return;
        };
        match self.form.compute(lane) {
            Ok(spec) => self.set_spec(spec),
            Err(e) => {
                log::error!("Selection failed: {e:#}");
                self.status_message = Some(format!("Error: {e:#}"));
            }
        }
    }

    pub fn set_spec(&mut self, spec: SpecData) {
        if spec.is_empty() {
            self.status_message = Some(format!(
                "Selection is empty ({} x {})",
                spec.time.len(),
                spec.freq.len()
            ));
        } else {
            self.status_message = None;
        }
        self.scale = Some(ColorScale::from_spec(&spec));
        self.spec = Some(spec);
        self.texture = None;
    }

    /// Texture of the current spectrum, uploaded on first use.
    pub fn texture(&mut self, ctx: &egui::Context) -> Option<egui::TextureId> {
        if self.texture.is_none() {
            let spec = self.spec.as_ref().filter(|s| !s.is_empty())?;
            let scale = self.scale.unwrap_or_else(|| ColorScale::from_spec(spec));
            let image = color::render(spec, &scale);
            let pixels = egui::ColorImage::from_rgb([image.width, image.height], &image.pixels);
            self.texture = Some(ctx.load_texture("dynamic_spectrum", pixels, egui::TextureOptions::NEAREST));
        }
        self.texture.as_ref().map(|t| t.id())
    }
}

/// Headless rendering/export of one selection.
pub fn save(lane_path: &Path, layout: RecordLayout, form: &SelectionForm, out: &Path) -> Result<()> {
    let lane = Lane::open_with_layout(lane_path, layout)
        .with_context(|| format!("opening {}", lane_path.display()))?;
    let spec = form.compute(&lane)?;
    if spec.is_empty() && out.extension().is_some_and(|e| e.eq_ignore_ascii_case("png")) {
        bail!("selection is empty, nothing to plot");
    }
    lane_spectra::data::export::save_spec(&spec, out)
}

#[cfg(test)]
mod tests {
    use lane_spectra::data::model::Record;
    use lane_spectra::data::writer::SpectraWriter;
    use lane_spectra::time::Timestamp;

    use super::*;

    fn lane(dir: &Path) -> Lane {
        let layout = RecordLayout {
            channels_per_record: 4,
            channel_width_mhz: 1.0,
            ..RecordLayout::default()
        };
        let path = dir.join("form_3.spectra");
        let mut writer = SpectraWriter::create(&path, layout.clone()).unwrap();
        for t in 0..4i64 {
            writer
                .write_record(&Record {
                    timestamp: Timestamp::from_nanos(t * 1_000_000_000),
                    beam: 0,
                    channels: 20..24,
                    values: [(Polarization::I, vec![10.0; 4])].into_iter().collect(),
                })
                .unwrap();
        }
        Lane::open_with_layout(writer.finish().unwrap(), layout).unwrap()
    }

    #[test]
    fn blank_form_selects_everything() {
        let dir = tempfile::tempdir().unwrap();
        let lane = lane(dir.path());
        let spec = SelectionForm::default().compute(&lane).unwrap();
        assert_eq!(spec.shape(), (4, 4));
    }

    #[test]
    fn half_open_ranges_fill_in_from_the_lane() {
        let dir = tempfile::tempdir().unwrap();
        let lane = lane(dir.path());
        let form = SelectionForm {
            time_start: "1970-01-01T00:00:02".into(),
            freq_high: "21.5".into(),
            ..SelectionForm::default()
        };
        let spec = form.compute(&lane).unwrap();
        assert_eq!(spec.shape(), (2, 2));
    }

    #[test]
    fn averaged_db_output() {
        let dir = tempfile::tempdir().unwrap();
        let lane = lane(dir.path());
        let form = SelectionForm {
            average: true,
            db: true,
            ..SelectionForm::default()
        };
        let spec = form.compute(&lane).unwrap();
        assert_eq!(spec.shape(), (1, 1));
        assert!((spec.data[[0, 0]] - 10.0).abs() < 1e-12);
    }

    #[test]
    fn bad_numbers_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let lane = lane(dir.path());
        let form = SelectionForm {
            freq_low: "low".into(),
            ..SelectionForm::default()
        };
        let err = form.compute(&lane).unwrap_err();
        assert!(format!("{err:#}").contains("low frequency"));
    }
}
