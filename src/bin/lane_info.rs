use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use lane_spectra::data::layout::RecordLayout;
use lane_spectra::data::model::LaneInfo;
use lane_spectra::Lane;

#[derive(Parser, Debug)]
#[command(
    name = "lane-info",
    author,
    version,
    about = "Print the time range, frequency range and beams of lane files",
    long_about = None
)]
struct Args {
    /// Lane files
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// JSON record layout (default: built-in)
    #[arg(long)]
    layout: Option<PathBuf>,

    /// Emit one JSON document per file instead of text
    #[arg(long)]
    json: bool,

    /// Also list the first N index entries
    #[arg(long, value_name = "N")]
    entries: Option<usize>,
}

fn print_text(info: &LaneInfo) {
    println!("{}", info.path.display());
    if let Some(id) = info.lane_id {
        println!("  lane          {id}");
    }
    println!("  time          {} .. {}", info.time_range.0, info.time_range.1);
    println!(
        "  frequency     {:.6} .. {:.6} MHz ({} MHz channels)",
        info.freq_range.0, info.freq_range.1, info.channel_width_mhz
    );
    println!("  products      {}", info.polarizations);
    println!("  records       {}", info.record_count);
    if info.truncated_records > 0 {
        println!(
            "  truncated     {} record(s), {} bytes at end of file",
            info.truncated_records, info.truncated_bytes
        );
    }
    for beam in &info.beams {
        println!(
            "  beam {:<4}     channels {}..{}  {:.6} .. {:.6} MHz  {} records",
            beam.beam,
            beam.first_channel,
            beam.first_channel + beam.channel_count,
            beam.freq_range.0,
            beam.freq_range.1,
            beam.records
        );
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let layout = match &args.layout {
        Some(path) => RecordLayout::from_json_file(path)
            .with_context(|| format!("loading layout {}", path.display()))?,
        None => RecordLayout::default(),
    };

    for path in &args.files {
        let lane = Lane::open_with_layout(path, layout.clone())
            .with_context(|| format!("opening {}", path.display()))?;
        let info = lane.info();

        if args.json {
            println!("{}", serde_json::to_string_pretty(&info).context("serializing lane info")?);
        } else {
            print_text(&info);
        }

        if let Some(n) = args.entries {
            for entry in lane.index().entries().iter().take(n) {
                println!(
                    "  @{:<12} beam {:<4} {}  {} bytes",
                    entry.byte_offset, entry.beam, entry.timestamp, entry.byte_length
                );
            }
        }
    }
    Ok(())
}
