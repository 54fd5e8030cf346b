use image::codecs::png::PngEncoder;
use image::{ColorType, GrayImage, ImageEncoder, ImageError, Luma, Rgb, RgbImage};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// Error type for mask and scene image files.
#[derive(Debug, thiserror::Error)]
pub enum MaskIoError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("image codec error on {path}: {source}")]
    Codec { path: String, source: ImageError },
}

impl MaskIoError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        MaskIoError::Io {
            path: path.display().to_string(),
            source,
        }
    }

    fn codec(path: &Path, source: ImageError) -> Self {
        MaskIoError::Codec {
            path: path.display().to_string(),
            source,
        }
    }
}

// ============================================================================
// LABEL MASKS
// ============================================================================

/// Write a label mask as an 8-bit single-channel PNG. Lossless: every
/// category id in 0–255 reads back unchanged via [`load_mask`].
pub fn save_mask(mask: &GrayImage, path: &Path) -> Result<(), MaskIoError> {
    let file = File::create(path).map_err(|e| MaskIoError::io(path, e))?;
    let mut writer = BufWriter::new(file);

    PngEncoder::new(&mut writer)
        .write_image(mask.as_raw(), mask.width(), mask.height(), ColorType::L8)
        .map_err(|e| MaskIoError::codec(path, e))
}

/// Read a label mask. Non-grayscale files are converted to luma.
pub fn load_mask(path: &Path) -> Result<GrayImage, MaskIoError> {
    let img = image::open(path).map_err(|e| match e {
        ImageError::IoError(io) => MaskIoError::io(path, io),
        other => MaskIoError::codec(path, other),
    })?;
    Ok(img.to_luma8())
}

/// 255 where `mask == label`, 0 everywhere else. Labels absent from the mask
/// give an all-zero result.
pub fn binarize(mask: &GrayImage, label: u8) -> GrayImage {
    let (w, h) = mask.dimensions();
    GrayImage::from_fn(w, h, |x, y| {
        if mask.get_pixel(x, y).0[0] == label {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

// ============================================================================
// SCENE IMAGES
// ============================================================================

/// Load the scene photo as 8-bit RGB regardless of its source format.
pub fn load_scene(path: &Path) -> Result<RgbImage, MaskIoError> {
    let img = image::open(path).map_err(|e| match e {
        ImageError::IoError(io) => MaskIoError::io(path, io),
        other => MaskIoError::codec(path, other),
    })?;
    Ok(img.to_rgb8())
}

pub fn save_scene(image: &RgbImage, path: &Path) -> Result<(), MaskIoError> {
    let file = File::create(path).map_err(|e| MaskIoError::io(path, e))?;
    let mut writer = BufWriter::new(file);

    PngEncoder::new(&mut writer)
        .write_image(image.as_raw(), image.width(), image.height(), ColorType::Rgb8)
        .map_err(|e| MaskIoError::codec(path, e))
}

// ============================================================================
// PREVIEW
// ============================================================================

/// Spectral ramp stops (violet → blue → green → yellow → red → grey) used to
/// spread category ids over distinguishable colours.
const SPECTRAL_STOPS: [[u8; 3]; 7] = [
    [119, 0, 136],
    [0, 0, 221],
    [0, 153, 221],
    [0, 170, 0],
    [221, 221, 0],
    [221, 0, 0],
    [204, 204, 204],
];

/// Colour-code a label mask for eyeballing. Background stays black; the
/// largest id present maps to the top of the ramp.
pub fn colorize(mask: &GrayImage) -> RgbImage {
    let max_id = mask.pixels().map(|p| p.0[0]).max().unwrap_or(0).max(1);
    let mut lut = [[0u8; 3]; 256];
    for (id, entry) in lut.iter_mut().enumerate().skip(1) {
        let t = (id.min(max_id as usize)) as f32 / max_id as f32;
        *entry = spectral(t);
    }

    let (w, h) = mask.dimensions();
    RgbImage::from_fn(w, h, |x, y| Rgb(lut[mask.get_pixel(x, y).0[0] as usize]))
}

fn spectral(t: f32) -> [u8; 3] {
    let scaled = t.clamp(0.0, 1.0) * (SPECTRAL_STOPS.len() - 1) as f32;
    let lo = scaled.floor() as usize;
    let hi = (lo + 1).min(SPECTRAL_STOPS.len() - 1);
    let frac = scaled - lo as f32;
    let mut out = [0u8; 3];
    for c in 0..3 {
        let a = SPECTRAL_STOPS[lo][c] as f32;
        let b = SPECTRAL_STOPS[hi][c] as f32;
        out[c] = (a + (b - a) * frac).round().clamp(0.0, 255.0) as u8;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_mask() -> GrayImage {
        GrayImage::from_raw(3, 2, vec![0, 1, 2, 2, 7, 255]).unwrap()
    }

    #[test]
    fn binarize_marks_exactly_the_label() {
        let mask = sample_mask();
        let bin = binarize(&mask, 2);
        assert_eq!(bin.dimensions(), (3, 2));
        assert_eq!(bin.as_raw(), &vec![0, 0, 255, 255, 0, 0]);
    }

    #[test]
    fn binarize_absent_label_is_all_zero() {
        let bin = binarize(&sample_mask(), 3);
        assert!(bin.pixels().all(|p| p.0[0] == 0));
    }

    #[test]
    fn binarize_output_is_two_valued() {
        let mask = sample_mask();
        for label in 0..=255u8 {
            let bin = binarize(&mask, label);
            assert!(bin.pixels().all(|p| p.0[0] == 0 || p.0[0] == 255));
        }
    }

    #[test]
    fn mask_roundtrip_is_lossless() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mask.png");
        let mask = GrayImage::from_fn(16, 16, |x, y| Luma([(x * 16 + y) as u8]));

        save_mask(&mask, &path).unwrap();
        let loaded = load_mask(&path).unwrap();
        assert_eq!(loaded, mask);

        let again = dir.path().join("again.png");
        save_mask(&loaded, &again).unwrap();
        assert_eq!(load_mask(&again).unwrap(), mask);
    }

    #[test]
    fn load_missing_mask_is_io_error() {
        let err = load_mask(Path::new("/nonexistent/mask_0.png")).unwrap_err();
        assert!(matches!(err, MaskIoError::Io { .. }));
    }

    #[test]
    fn scene_is_saved_as_rgb() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scene.png");
        let img = RgbImage::from_pixel(4, 3, Rgb([10, 20, 30]));
        save_scene(&img, &path).unwrap();

        let reopened = image::open(&path).unwrap();
        assert_eq!(reopened.color(), ColorType::Rgb8);
        assert_eq!(load_scene(&path).unwrap(), img);
    }

    #[test]
    fn colorize_keeps_background_black() {
        let preview = colorize(&sample_mask());
        assert_eq!(preview.get_pixel(0, 0), &Rgb([0, 0, 0]));
        assert_ne!(preview.get_pixel(1, 0), &Rgb([0, 0, 0]));
        // Equal ids share a colour
        assert_eq!(preview.get_pixel(2, 0), preview.get_pixel(0, 1));
        assert_eq!(preview.get_pixel(2, 1), &Rgb(SPECTRAL_STOPS[6]));
    }
}
