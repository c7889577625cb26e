use eframe::egui::{self, Ui};
use egui_plot::{Plot, PlotImage, PlotPoint};

use lane_spectra::data::model::SpecData;

use crate::state::AppState;

// ---------------------------------------------------------------------------
// Dynamic spectrum heatmap (central panel)
// ---------------------------------------------------------------------------

/// Spacing of the last two axis values, or 1 for a single sample.
fn last_step(values: &[f64]) -> f64 {
    match values {
        [.., a, b] if b > a => b - a,
        _ => 1.0,
    }
}

/// Plot-space rectangle covered by the image: seconds since the first sample
/// on x, MHz on y.
fn extent(spec: &SpecData) -> ([f64; 2], [f64; 2]) {
    let seconds = spec.relative_seconds();
    let x_end = seconds.last().copied().unwrap_or(0.0) + last_step(&seconds);
    let y_start = spec.freq.first().copied().unwrap_or(0.0);
    let y_end = spec.freq.last().copied().unwrap_or(0.0) + last_step(&spec.freq);
    ([0.0, x_end], [y_start, y_end])
}

/// Render the dynamic spectrum in the central panel.
pub fn spectrum_plot(ui: &mut Ui, state: &mut AppState) {
    let Some(texture) = state.texture(ui.ctx()) else {
        ui.centered_and_justified(|ui: &mut Ui| {
            let text = if state.spec.is_some() {
                "Selection is empty"
            } else {
                "Open a lane file to view its dynamic spectrum  (File → Open…)"
            };
            ui.heading(text);
        });
        return;
    };
    let Some(spec) = &state.spec else {
        return;
    };

    let ([x0, x1], [y0, y1]) = extent(spec);
    let center = PlotPoint::new((x0 + x1) / 2.0, (y0 + y1) / 2.0);
    let size = egui::vec2((x1 - x0) as f32, (y1 - y0) as f32);

    let start = spec.time.first().copied();
    let unit = if state.form.db { "dB" } else { "arb." };
    let title = format!(
        "beam {} · {} [{unit}]{}",
        spec.beam,
        spec.polarization,
        start.map(|t| format!(" · from {t}")).unwrap_or_default()
    );

    if let Some(scale) = &state.scale {
        ui.label(format!("{title} · colour range {:.3} … {:.3}", scale.min, scale.max));
    } else {
        ui.label(title);
    }

    Plot::new("dynamic_spectrum")
        .x_axis_label("Time since start [s]")
        .y_axis_label("Frequency [MHz]")
        .label_formatter(move |_name, value| match start {
            Some(t0) => format!(
                "{}\n{:.4} MHz",
                t0.offset_nanos((value.x * 1e9).round() as i64),
                value.y
            ),
            None => format!("{:.3} s\n{:.4} MHz", value.x, value.y),
        })
        .allow_boxed_zoom(true)
        .allow_drag(true)
        .allow_scroll(true)
        .allow_zoom(true)
        .show(ui, |plot_ui| {
            plot_ui.image(PlotImage::new(texture, center, size));
        });
}
