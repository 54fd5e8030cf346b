// ============================================================================
// COCO segmentations → multiclass label masks
// ============================================================================

use image::{GrayImage, Luma};
use imageproc::drawing::{Canvas, draw_polygon_mut};
use imageproc::point::Point;
use std::path::{Path, PathBuf};

use crate::coco::{CocoAnnotation, CocoDataset, CocoImage, RleCounts, Segmentation};
use crate::io::{MaskIoError, colorize, save_mask, save_scene};
use crate::{log_info, log_warn};

#[derive(Debug, thiserror::Error)]
pub enum RasterizeError {
    #[error("image {image_id}: category id {category_id} does not fit an 8-bit mask (1-255)")]
    CategoryOutOfRange { image_id: u64, category_id: u64 },
    #[error("image {image_id}: RLE size {rle_h}x{rle_w} does not match image {height}x{width}")]
    RleSizeMismatch {
        image_id: u64,
        rle_h: u32,
        rle_w: u32,
        height: u32,
        width: u32,
    },
    #[error("could not create output directory {path}: {source}")]
    OutputDir {
        path: String,
        source: std::io::Error,
    },
    #[error(transparent)]
    Io(#[from] MaskIoError),
}

/// Drawing target that only ever raises pixel values. Filling a polygon on it
/// is the same as filling on a blank layer and merging by element-wise max.
struct MaxCanvas<'a>(&'a mut GrayImage);

impl Canvas for MaxCanvas<'_> {
    type Pixel = Luma<u8>;

    fn dimensions(&self) -> (u32, u32) {
        self.0.dimensions()
    }

    fn get_pixel(&self, x: u32, y: u32) -> Self::Pixel {
        *self.0.get_pixel(x, y)
    }

    fn draw_pixel(&mut self, x: u32, y: u32, color: Self::Pixel) {
        let px = self.0.get_pixel_mut(x, y);
        if color.0[0] > px.0[0] {
            *px = color;
        }
    }
}

/// Build the label mask for one image from its annotations.
///
/// The mask has the image's declared size and starts at 0. Each polygon is
/// filled (outline included) with its category id; overlaps keep the larger id.
pub fn rasterize_image<'a>(
    image: &CocoImage,
    annotations: impl IntoIterator<Item = &'a CocoAnnotation>,
) -> Result<GrayImage, RasterizeError> {
    let mut mask = GrayImage::new(image.width, image.height);

    for anno in annotations {
        let value = category_value(image.id, anno.category_id)?;
        match &anno.segmentation {
            Segmentation::Polygons(polygons) => {
                for flat in polygons {
                    fill_polygon(&mut mask, flat, value, image.id);
                }
            }
            Segmentation::Rle { size, counts } => {
                fill_rle(&mut mask, image, *size, counts, value)?;
            }
        }
    }

    Ok(mask)
}

fn category_value(image_id: u64, category_id: u64) -> Result<u8, RasterizeError> {
    match u8::try_from(category_id) {
        Ok(v) if v > 0 => Ok(v),
        _ => Err(RasterizeError::CategoryOutOfRange {
            image_id,
            category_id,
        }),
    }
}

/// Convert a flat `[x0, y0, x1, y1, ...]` list into pixel points. Coordinates
/// are rounded; repeated closing points are dropped because the fill closes
/// the ring itself.
pub fn polygon_points(flat: &[f64]) -> Vec<Point<i32>> {
    let mut points: Vec<Point<i32>> = flat
        .chunks_exact(2)
        .map(|xy| Point::new(xy[0].round() as i32, xy[1].round() as i32))
        .collect();

    while points.len() > 1 && points.first() == points.last() {
        points.pop();
    }
    points
}

fn fill_polygon(mask: &mut GrayImage, flat: &[f64], value: u8, image_id: u64) {
    if flat.len() % 2 != 0 {
        log_warn!(
            "image {}: polygon has an odd coordinate count ({}), ignoring the last value",
            image_id,
            flat.len()
        );
    }

    // imageproc clamps its scanline range to row 0 even on an empty buffer
    if mask.width() == 0 || mask.height() == 0 {
        return;
    }

    let points = polygon_points(flat);
    let mut canvas = MaxCanvas(mask);
    match points.as_slice() {
        [] => {}
        [p] => {
            // Single-pixel ring; the fill primitive needs distinct endpoints
            let (w, h) = canvas.dimensions();
            if p.x >= 0 && p.y >= 0 && (p.x as u32) < w && (p.y as u32) < h {
                canvas.draw_pixel(p.x as u32, p.y as u32, Luma([value]));
            }
        }
        _ => draw_polygon_mut(&mut canvas, &points, Luma([value])),
    }
}

/// Paint the foreground runs of a COCO RLE. Runs are column-major and start
/// with background.
fn fill_rle(
    mask: &mut GrayImage,
    image: &CocoImage,
    size: [u32; 2],
    counts: &RleCounts,
    value: u8,
) -> Result<(), RasterizeError> {
    let [rle_h, rle_w] = size;
    if rle_h != image.height || rle_w != image.width {
        return Err(RasterizeError::RleSizeMismatch {
            image_id: image.id,
            rle_h,
            rle_w,
            height: image.height,
            width: image.width,
        });
    }

    let h = image.height as usize;
    let total = h * image.width as usize;
    let mut pos = 0usize;
    for (i, run) in counts.runs().into_iter().enumerate() {
        let end = (pos + run as usize).min(total);
        if i % 2 == 1 {
            for k in pos..end {
                let (x, y) = ((k / h) as u32, (k % h) as u32);
                let px = mask.get_pixel_mut(x, y);
                px.0[0] = px.0[0].max(value);
            }
        }
        pos = end;
        if pos >= total {
            break;
        }
    }
    Ok(())
}

// ============================================================================
// Batch export
// ============================================================================

#[derive(Clone, Copy, Debug, Default)]
pub struct MaskExportOptions {
    /// Also write a colour-coded `mask_<id>_preview.png` next to each mask.
    pub preview: bool,
}

/// Files written for one image.
#[derive(Clone, Debug)]
pub struct ExportedMask {
    pub image_id: u64,
    pub path: PathBuf,
    pub preview: Option<PathBuf>,
}

pub fn mask_file_name(image_id: u64) -> String {
    format!("mask_{}.png", image_id)
}

/// Rasterize every listed image and write `mask_<image_id>.png` files into
/// `output_dir`, in document order. Stops at the first failure; masks already
/// written stay on disk.
pub fn export_masks(
    dataset: &CocoDataset,
    output_dir: &Path,
    options: MaskExportOptions,
) -> Result<Vec<ExportedMask>, RasterizeError> {
    std::fs::create_dir_all(output_dir).map_err(|source| RasterizeError::OutputDir {
        path: output_dir.display().to_string(),
        source,
    })?;

    let mut written = Vec::with_capacity(dataset.images.len());
    for image in &dataset.images {
        let mask = rasterize_image(image, dataset.annotations_for(image.id))?;

        let path = output_dir.join(mask_file_name(image.id));
        save_mask(&mask, &path)?;

        let preview = if options.preview {
            let preview_path = output_dir.join(format!("mask_{}_preview.png", image.id));
            save_scene(&colorize(&mask), &preview_path)?;
            Some(preview_path)
        } else {
            None
        };

        let mut names: Vec<&str> = Vec::new();
        for anno in dataset.annotations_for(image.id) {
            let name = dataset.category_name(anno.category_id).unwrap_or("?");
            if !names.contains(&name) {
                names.push(name);
            }
        }
        log_info!(
            "mask for image {} ({}x{}, categories: {}) -> {}",
            image.id,
            image.width,
            image.height,
            names.join(", "),
            path.display()
        );
        written.push(ExportedMask {
            image_id: image.id,
            path,
            preview,
        });
    }

    Ok(written)
}
