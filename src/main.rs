mod app;
mod state;
mod ui;

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use eframe::egui;

use app::LaneSpectraApp;
use lane_spectra::data::layout::RecordLayout;
use lane_spectra::data::model::Polarization;
use state::{AppState, SelectionForm};

#[derive(Parser, Debug, Clone)]
#[command(
    author,
    version,
    about = "Dynamic spectrum viewer for lane files",
    long_about = None,
    after_help = "Examples:\n  lane-spectra 20191003_072055_2.spectra\n  lane-spectra 20191003_072055_2.spectra --time 07:25:50 07:25:54.44 --freq 50 54.97 --save burst.png\n  lane-spectra 20191003_072055_2.spectra --average --dt 3 --df 2 --db --save avg.parquet\n"
)]
struct Args {
    /// Lane file to open (a file dialog is offered when omitted)
    file: Option<PathBuf>,

    /// JSON record layout (default: built-in 32-byte header, f32 samples)
    #[arg(long)]
    layout: Option<PathBuf>,

    /// Time range: ISO date-time, time of day on the lane's date, or Unix seconds
    #[arg(long, num_args = 2, value_names = ["START", "END"])]
    time: Option<Vec<String>>,

    /// Frequency range (MHz)
    #[arg(long, num_args = 2, value_names = ["LOW", "HIGH"], allow_hyphen_values = true)]
    freq: Option<Vec<f64>>,

    /// Beam id (default: lowest in the lane)
    #[arg(long)]
    beam: Option<u32>,

    /// Polarization product (I, Q, U, V, XX, YY, XYRe, XYIm, fracV, argXY, phaseXY)
    #[arg(long, default_value = "I")]
    pol: Polarization,

    /// Rebin instead of showing full resolution
    #[arg(long)]
    average: bool,

    /// Time bin width when averaging (s); whole range when omitted
    #[arg(long, requires = "average")]
    dt: Option<f64>,

    /// Frequency bin width when averaging (MHz); whole range when omitted
    #[arg(long, requires = "average")]
    df: Option<f64>,

    /// Show 10·log10 of the data
    #[arg(long)]
    db: bool,

    /// Write the result (.png, .parquet, .json, .csv) instead of opening a window
    #[arg(long)]
    save: Option<PathBuf>,
}

impl Args {
    fn form(&self) -> SelectionForm {
        let (time_start, time_end) = match self.time.as_deref() {
            Some([a, b]) => (a.clone(), b.clone()),
            _ => (String::new(), String::new()),
        };
        let (freq_low, freq_high) = match self.freq.as_deref() {
            Some(&[lo, hi]) => (lo.to_string(), hi.to_string()),
            _ => (String::new(), String::new()),
        };
        SelectionForm {
            time_start,
            time_end,
            freq_low,
            freq_high,
            beam: self.beam,
            polarization: self.pol,
            average: self.average,
            dt: self.dt.map(|v| v.to_string()).unwrap_or_default(),
            df: self.df.map(|v| v.to_string()).unwrap_or_default(),
            db: self.db,
        }
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let layout = match &args.layout {
        Some(path) => RecordLayout::from_json_file(path)
            .with_context(|| format!("loading layout {}", path.display()))?,
        None => RecordLayout::default(),
    };
    let form = args.form();

    if let Some(out) = &args.save {
        let Some(file) = &args.file else {
            bail!("--save needs a lane file");
        };
        return state::save(file, layout, &form, out);
    }

    let mut state = AppState::new(layout, form);
    if let Some(file) = &args.file {
        state.open_lane(file);
    }

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1200.0, 800.0])
            .with_min_inner_size([600.0, 400.0]),
        ..Default::default()
    };

    eframe::run_native(
        "Lane Spectra – Dynamic Spectrum Viewer",
        options,
        Box::new(|_cc| Ok(Box::new(LaneSpectraApp::new(state)))),
    )
    .map_err(|e| anyhow::anyhow!("viewer failed: {e}"))
}
