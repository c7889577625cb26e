use palette::{LinSrgb, Mix, Srgb};

use crate::data::model::SpecData;

/// Pixel colour of a no-data cell.
pub const NO_DATA_RGB: [u8; 3] = [128, 128, 128];

// ---------------------------------------------------------------------------
// Colour scale: value → [0, 1]
// ---------------------------------------------------------------------------

/// Linear value range mapped onto the colormap. Values outside are clamped.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorScale {
    pub min: f64,
    pub max: f64,
}

impl ColorScale {
    /// 5th to 95th percentile of the finite values.
    pub fn from_spec(spec: &SpecData) -> Self {
        match (spec.percentile(5.0), spec.percentile(95.0)) {
            (Some(min), Some(max)) => ColorScale { min, max },
            _ => ColorScale { min: 0.0, max: 1.0 },
        }
    }

    /// `None` for non-finite values.
    pub fn normalize(&self, value: f64) -> Option<f32> {
        if !value.is_finite() {
            return None;
        }
        let span = self.max - self.min;
        if span <= 0.0 {
            return Some(0.5);
        }
        Some(((value - self.min) / span).clamp(0.0, 1.0) as f32)
    }
}

// ---------------------------------------------------------------------------
// Colormap: [0, 1] → RGB
// ---------------------------------------------------------------------------

/// Dark blue through teal and green to pale yellow.
const ANCHORS: [(u8, u8, u8); 5] = [
    (8, 29, 88),
    (34, 94, 168),
    (65, 182, 196),
    (199, 233, 180),
    (255, 255, 217),
];

/// Piecewise-linear gradient, interpolated in linear RGB.
#[derive(Debug, Clone)]
pub struct Colormap {
    stops: Vec<LinSrgb>,
}

impl Default for Colormap {
    fn default() -> Self {
        let stops = ANCHORS
            .iter()
            .map(|&(r, g, b)| Srgb::<u8>::new(r, g, b).into_format::<f32>().into_linear())
            .collect();
        Colormap { stops }
    }
}

impl Colormap {
    pub fn rgb(&self, t: f32) -> [u8; 3] {
        let segments = (self.stops.len() - 1) as f32;
        let x = t.clamp(0.0, 1.0) * segments;
        let i = (x.floor() as usize).min(self.stops.len() - 2);
        let mixed = self.stops[i].mix(self.stops[i + 1], x - i as f32);
        let out: Srgb<u8> = Srgb::<f32>::from_linear(mixed).into_format();
        [out.red, out.green, out.blue]
    }
}

// ---------------------------------------------------------------------------
// Heatmap rendering
// ---------------------------------------------------------------------------

/// Row-major RGB8 pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct RgbImage {
    pub width: usize,
    pub height: usize,
    pub pixels: Vec<u8>,
}

/// Render `spec` with time along x and frequency along y, highest frequency on
/// the top row.
pub fn render(spec: &SpecData, scale: &ColorScale) -> RgbImage {
    let colormap = Colormap::default();
    let (n_time, n_freq) = spec.shape();
    let mut pixels = Vec::with_capacity(n_time * n_freq * 3);
    for f in (0..n_freq).rev() {
        for t in 0..n_time {
            let rgb = scale
                .normalize(spec.data[[t, f]])
                .map_or(NO_DATA_RGB, |x| colormap.rgb(x));
            pixels.extend_from_slice(&rgb);
        }
    }
    RgbImage {
        width: n_time,
        height: n_freq,
        pixels,
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;
    use crate::data::model::{Polarization, NO_DATA};
    use crate::time::Timestamp;

    #[test]
    fn colormap_hits_its_anchors() {
        let map = Colormap::default();
        assert_eq!(map.rgb(0.0), [8, 29, 88]);
        assert_eq!(map.rgb(1.0), [255, 255, 217]);
        assert_eq!(map.rgb(7.0), map.rgb(1.0));
    }

    #[test]
    fn flat_scale_maps_to_the_middle() {
        let scale = ColorScale { min: 2.0, max: 2.0 };
        assert_eq!(scale.normalize(2.0), Some(0.5));
        assert_eq!(scale.normalize(f64::NAN), None);
    }

    #[test]
    fn render_flips_frequency_and_greys_out_no_data() {
        let spec = SpecData {
            time: vec![Timestamp::from_nanos(0), Timestamp::from_nanos(1)],
            freq: vec![10.0, 20.0],
            data: array![[0.0, NO_DATA], [1.0, 1.0]],
            polarization: Polarization::I,
            beam: 0,
        };
        let img = render(&spec, &ColorScale { min: 0.0, max: 1.0 });
        assert_eq!((img.width, img.height), (2, 2));
        // top-left pixel is (t = 0, f = 20 MHz)
        assert_eq!(&img.pixels[0..3], &NO_DATA_RGB);
        // bottom-left pixel is (t = 0, f = 10 MHz)
        assert_eq!(&img.pixels[6..9], &[8, 29, 88]);
    }
}
