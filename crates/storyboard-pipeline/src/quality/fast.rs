use storyboard_core::config::FastQaConfig;
use storyboard_core::model::FastQaReport;

/// Luma samples taken per image at most; larger images are strided.
const MAX_SAMPLES: u64 = 65_536;
/// Luma standard deviation at which contrast counts as full.
const FULL_CONTRAST_STD: f64 = 48.0;

const CONTRAST_WEIGHT: f64 = 0.5;
const EXPOSURE_WEIGHT: f64 = 0.3;
const COVERAGE_WEIGHT: f64 = 0.2;

/// Image statistics used by the heuristic score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LumaStats {
    pub mean: f64,
    pub std_dev: f64,
}

/// Cheap local checks run on every rendered image.
#[derive(Debug, Clone)]
pub struct FastQa {
    config: FastQaConfig,
}

impl FastQa {
    pub fn new(config: FastQaConfig) -> Self {
        Self { config }
    }

    pub fn evaluate(&self, bytes: &[u8]) -> FastQaReport {
        let img = match image::load_from_memory(bytes) {
            Ok(img) => img,
            Err(e) => {
                return FastQaReport {
                    score: 0.0,
                    width: 0,
                    height: 0,
                    passed: false,
                    issues: vec![format!("undecodable image: {e}")],
                }
            }
        };
        let (width, height) = (img.width(), img.height());
        let mut issues = Vec::new();
        let mut hard_fail = false;

        if width < self.config.min_width || height < self.config.min_height {
            issues.push(format!(
                "resolution {width}x{height} below minimum {}x{}",
                self.config.min_width, self.config.min_height
            ));
            hard_fail = true;
        }
        if let Some(expected) = self.config.expected_aspect {
            let aspect = width as f64 / height.max(1) as f64;
            if (aspect - expected).abs() / expected > self.config.aspect_tolerance {
                issues.push(format!(
                    "aspect ratio {aspect:.3} outside expected {expected:.3}"
                ));
                hard_fail = true;
            }
        }

        let stats = luma_stats(&img.to_luma8());
        let contrast = (stats.std_dev / FULL_CONTRAST_STD).min(1.0);
        let exposure = (1.0 - (stats.mean - 128.0).abs() / 128.0).clamp(0.0, 1.0);
        let pixels = u64::from(width) * u64::from(height);
        let coverage = (pixels as f64 / self.config.target_pixels.max(1) as f64).min(1.0);
        let score = CONTRAST_WEIGHT * contrast + EXPOSURE_WEIGHT * exposure + COVERAGE_WEIGHT * coverage;

        if contrast < 0.25 {
            issues.push("low contrast".to_string());
        }
        if exposure < 0.5 {
            let kind = if stats.mean < 128.0 { "underexposed" } else { "overexposed" };
            issues.push(kind.to_string());
        }
        let passed = !hard_fail && score >= self.config.min_score;
        if !hard_fail && !passed {
            issues.push(format!("heuristic score {score:.2} below {:.2}", self.config.min_score));
        }

        FastQaReport {
            score: if hard_fail { 0.0 } else { score },
            width,
            height,
            passed,
            issues,
        }
    }
}

/// Mean and standard deviation of luma, on a strided sample for large images.
pub fn luma_stats(luma: &image::GrayImage) -> LumaStats {
    let raw = luma.as_raw();
    if raw.is_empty() {
        return LumaStats {
            mean: 0.0,
            std_dev: 0.0,
        };
    }
    let step = ((raw.len() as u64).div_ceil(MAX_SAMPLES)).max(1) as usize;
    let mut n = 0.0;
    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    for &v in raw.iter().step_by(step) {
        let v = f64::from(v);
        n += 1.0;
        sum += v;
        sum_sq += v * v;
    }
    let mean = sum / n;
    let variance = (sum_sq / n - mean * mean).max(0.0);
    LumaStats {
        mean,
        std_dev: variance.sqrt(),
    }
}

#[cfg(test)]
pub(crate) mod test_images {
    use std::io::Cursor;

    /// PNG with a horizontal black-to-white gradient.
    pub fn gradient_png(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbImage::from_fn(width, height, |x, _| {
            let v = (x * 255 / width.max(2).saturating_sub(1)).min(255) as u8;
            image::Rgb([v, v, v])
        });
        encode(img)
    }

    pub fn solid_png(width: u32, height: u32, level: u8) -> Vec<u8> {
        encode(image::RgbImage::from_pixel(width, height, image::Rgb([level; 3])))
    }

    fn encode(img: image::RgbImage) -> Vec<u8> {
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }
}
