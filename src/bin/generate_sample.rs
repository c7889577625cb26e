use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use lane_spectra::data::layout::RecordLayout;
use lane_spectra::data::model::{Polarization, Record};
use lane_spectra::data::writer::SpectraWriter;
use lane_spectra::time::{parse_time, seconds_to_nanos};

#[derive(Parser, Debug)]
#[command(
    name = "generate_sample",
    author,
    version,
    about = "Write a synthetic lane file with a drifting radio burst",
    long_about = None
)]
struct Args {
    /// Output file; the number after the last '_' is the lane id
    #[arg(default_value = "20191003_072055_2.spectra")]
    output: PathBuf,

    /// JSON record layout (default: built-in, Stokes I only)
    #[arg(long)]
    layout: Option<PathBuf>,

    /// Time of the first record
    #[arg(long, default_value = "2019-10-03T07:20:55")]
    start: String,

    /// Records per beam at the regular cadence
    #[arg(long, default_value_t = 300)]
    records: usize,

    /// Cadence (s)
    #[arg(long, default_value_t = 1.0)]
    interval: f64,

    /// Extra final record after the regular cadence
    #[arg(long, default_value = "2019-10-03T07:25:54.4404020")]
    last: Option<String>,

    /// First channel of every record
    #[arg(long, default_value_t = 200)]
    first_channel: u32,

    /// Beam ids to write, interleaved record by record
    #[arg(long, num_args = 1.., default_values_t = [0u32])]
    beams: Vec<u32>,

    /// PRNG seed
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

fn gaussian(x: f64, mu: f64, sigma: f64, amplitude: f64) -> f64 {
    amplitude * (-(x - mu).powi(2) / (2.0 * sigma.powi(2))).exp()
}

/// Galactic-like background falling with frequency, plus a burst drifting
/// from high to low frequency at `drift` MHz/s.
fn stokes_i(freq_mhz: f64, seconds: f64, burst_at: f64, drift: f64) -> f64 {
    let background = 1.0e3 * (freq_mhz / 50.0).powf(-2.5);
    let centre = 80.0 - drift * (seconds - burst_at);
    let burst = gaussian(freq_mhz, centre, 2.0, 4.0e3) * gaussian(seconds, burst_at, 20.0, 1.0);
    background + burst
}

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5))
            .rotate_left(7)
            .wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Box-Muller transform for normal distribution
    fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }
}

/// One spectrum per stored product. Raw correlations split I evenly; the
/// polarized products carry noise only.
fn products(layout: &RecordLayout, intensity: &[f64], rng: &mut SimpleRng) -> Vec<(Polarization, Vec<f64>)> {
    layout
        .polarizations
        .iter()
        .map(|&pol| {
            let values = intensity
                .iter()
                .map(|&i| {
                    let noisy = i * (1.0 + rng.gauss(0.0, 0.05));
                    match pol {
                        Polarization::I => noisy,
                        Polarization::XX | Polarization::YY => noisy / 2.0,
                        _ => rng.gauss(0.0, 0.01 * i),
                    }
                })
                .collect();
            (pol, values)
        })
        .collect()
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let layout = match &args.layout {
        Some(path) => RecordLayout::from_json_file(path)
            .with_context(|| format!("loading layout {}", path.display()))?,
        None => RecordLayout::default(),
    };
    let start = parse_time(&args.start, None).context("parsing --start")?;
    let last = args
        .last
        .as_deref()
        .map(|s| parse_time(s, Some(start.date())))
        .transpose()
        .context("parsing --last")?;

    let channels = args.first_channel..args.first_channel + layout.channels_per_record;
    let freqs: Vec<f64> = channels.clone().map(|ch| layout.channel_frequency(ch)).collect();

    let step = seconds_to_nanos(args.interval);
    let mut times: Vec<_> = (0..args.records as i64).map(|i| start.offset_nanos(i * step)).collect();
    if let Some(last) = last.filter(|&t| times.last().map_or(true, |&prev| t > prev)) {
        times.push(last);
    }

    let burst_at = args.records as f64 * args.interval / 2.0;
    let mut rng = SimpleRng::new(args.seed);
    let mut writer = SpectraWriter::create(&args.output, layout.clone())?;

    for &timestamp in &times {
        let seconds = timestamp.seconds_since(start);
        let intensity: Vec<f64> = freqs.iter().map(|&f| stokes_i(f, seconds, burst_at, 0.3)).collect();
        for &beam in &args.beams {
            writer.write_record(&Record {
                timestamp,
                beam,
                channels: channels.clone(),
                values: products(&layout, &intensity, &mut rng).into_iter().collect(),
            })?;
        }
    }

    let written = writer.records_written();
    let path = writer.finish()?;
    println!(
        "Wrote {written} records ({} channels, {:.4}-{:.4} MHz) to {}",
        freqs.len(),
        freqs.first().copied().unwrap_or_default(),
        freqs.last().copied().unwrap_or_default() + layout.channel_width_mhz,
        path.display()
    );
    Ok(())
}
