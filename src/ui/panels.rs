use eframe::egui::{self, Color32, RichText, ScrollArea, Ui};
use egui_extras::{Column, TableBuilder};

use lane_spectra::data::model::{LaneInfo, Polarization};

use crate::state::AppState;

// ---------------------------------------------------------------------------
// Left side panel – lane metadata and selection form
// ---------------------------------------------------------------------------

/// Render the left panel.
pub fn side_panel(ui: &mut Ui, state: &mut AppState) {
    let Some(lane) = &state.lane else {
        ui.heading("Lane");
        ui.separator();
        ui.label("No lane loaded.");
        return;
    };
    let info = lane.info();
    let polarizations: Vec<_> = lane.polarizations().iter().collect();

    ScrollArea::vertical()
        .auto_shrink([false, false])
        .show(ui, |ui: &mut Ui| {
            lane_summary(ui, &info);
            ui.separator();
            selection_form(ui, state, &info, &polarizations);
        });
}

fn lane_summary(ui: &mut Ui, info: &LaneInfo) {
    ui.heading(match info.lane_id {
        Some(id) => format!("Lane {id}"),
        None => "Lane".to_string(),
    });
    ui.label(
        info.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
    );
    ui.label(format!("{} → {}", info.time_range.0, info.time_range.1));
    ui.label(format!(
        "{:.4} – {:.4} MHz  ({} kHz channels)",
        info.freq_range.0,
        info.freq_range.1,
        info.channel_width_mhz * 1e3
    ));
    ui.label(format!("{} records, products {}", info.record_count, info.polarizations));
    if info.truncated_records > 0 {
        ui.label(
            RichText::new(format!("truncated tail: {} bytes skipped", info.truncated_bytes))
                .color(Color32::YELLOW),
        );
    }
    ui.add_space(4.0);

    TableBuilder::new(ui)
        .striped(true)
        .vscroll(false)
        .column(Column::auto())
        .column(Column::auto())
        .column(Column::remainder())
        .column(Column::auto())
        .header(18.0, |mut header| {
            for title in ["Beam", "Channels", "MHz", "Records"] {
                header.col(|ui: &mut Ui| {
                    ui.strong(title);
                });
            }
        })
        .body(|mut body| {
            for beam in &info.beams {
                body.row(18.0, |mut row| {
                    row.col(|ui: &mut Ui| {
                        ui.label(beam.beam.to_string());
                    });
                    row.col(|ui: &mut Ui| {
                        ui.label(format!(
                            "{}..{}",
                            beam.first_channel,
                            beam.first_channel + beam.channel_count
                        ));
                    });
                    row.col(|ui: &mut Ui| {
                        ui.label(format!("{:.3} – {:.3}", beam.freq_range.0, beam.freq_range.1));
                    });
                    row.col(|ui: &mut Ui| {
                        ui.label(beam.records.to_string());
                    });
                });
            }
        });
}

fn selection_form(ui: &mut Ui, state: &mut AppState, info: &LaneInfo, polarizations: &[Polarization]) {
    let form = &mut state.form;
    ui.heading("Selection");

    ui.strong("Time (ISO, time of day or Unix s)");
    ui.add(egui::TextEdit::singleline(&mut form.time_start).hint_text(info.time_range.0.iso()));
    ui.add(egui::TextEdit::singleline(&mut form.time_end).hint_text(info.time_range.1.iso()));

    ui.strong("Frequency [MHz]");
    ui.horizontal(|ui: &mut Ui| {
        ui.add(
            egui::TextEdit::singleline(&mut form.freq_low)
                .desired_width(80.0)
                .hint_text(format!("{:.3}", info.freq_range.0)),
        );
        ui.add(
            egui::TextEdit::singleline(&mut form.freq_high)
                .desired_width(80.0)
                .hint_text(format!("{:.3}", info.freq_range.1)),
        );
    });

    ui.horizontal(|ui: &mut Ui| {
        ui.strong("Beam");
        let beams = info.beam_ids();
        let current = form.beam.or_else(|| beams.first().copied());
        egui::ComboBox::from_id_salt("beam")
            .selected_text(current.map(|b| b.to_string()).unwrap_or_default())
            .show_ui(ui, |ui: &mut Ui| {
                for b in beams {
                    if ui.selectable_label(current == Some(b), b.to_string()).clicked() {
                        form.beam = Some(b);
                    }
                }
            });

        ui.strong("Pol.");
        egui::ComboBox::from_id_salt("polarization")
            .selected_text(form.polarization.to_string())
            .show_ui(ui, |ui: &mut Ui| {
                for &pol in polarizations {
                    ui.selectable_value(&mut form.polarization, pol, pol.to_string());
                }
            });
    });

    ui.checkbox(&mut form.average, "Average");
    ui.add_enabled_ui(form.average, |ui: &mut Ui| {
        ui.horizontal(|ui: &mut Ui| {
            ui.label("dt [s]");
            ui.add(egui::TextEdit::singleline(&mut form.dt).desired_width(60.0).hint_text("all"));
            ui.label("df [MHz]");
            ui.add(egui::TextEdit::singleline(&mut form.df).desired_width(60.0).hint_text("all"));
        });
    });
    ui.checkbox(&mut form.db, "Decibels");

    ui.add_space(6.0);
    if ui.button("Apply").clicked() {
        state.apply();
    }
}

// ---------------------------------------------------------------------------
// Top bar
// ---------------------------------------------------------------------------

/// Render the top menu / toolbar.
pub fn top_bar(ui: &mut Ui, state: &mut AppState) {
    egui::menu::bar(ui, |ui: &mut Ui| {
        ui.menu_button("File", |ui: &mut Ui| {
            if ui.button("Open…").clicked() {
                open_file_dialog(state);
                ui.close_menu();
            }
            let can_save = state.spec.as_ref().is_some_and(|s| !s.is_empty());
            if ui.add_enabled(can_save, egui::Button::new("Save as…")).clicked() {
                save_file_dialog(state);
                ui.close_menu();
            }
        });

        ui.separator();

        if let Some(spec) = &state.spec {
            let (rows, cols) = spec.shape();
            ui.label(format!("{rows} time samples × {cols} channels"));
        }

        if let Some(msg) = &state.status_message {
            ui.separator();
            ui.label(RichText::new(msg).color(Color32::RED));
        }
    });
}

// ---------------------------------------------------------------------------
// File dialogs
// ---------------------------------------------------------------------------

pub fn open_file_dialog(state: &mut AppState) {
    let file = rfd::FileDialog::new()
        .set_title("Open lane file")
        .add_filter("Lane files", &["spectra"])
        .add_filter("All files", &["*"])
        .pick_file();

    if let Some(path) = file {
        state.open_lane(&path);
    }
}

pub fn save_file_dialog(state: &mut AppState) {
    let Some(spec) = &state.spec else {
        return;
    };
    let file = rfd::FileDialog::new()
        .set_title("Save dynamic spectrum")
        .add_filter("PNG image", &["png"])
        .add_filter("Parquet", &["parquet"])
        .add_filter("JSON", &["json"])
        .add_filter("CSV", &["csv"])
        .save_file();

    if let Some(path) = file {
        if let Err(e) = lane_spectra::data::export::save_spec(spec, &path) {
            log::error!("Failed to save: {e:#}");
            state.status_message = Some(format!("Error: {e:#}"));
        }
    }
}
