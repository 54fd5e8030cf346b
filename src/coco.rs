// ============================================================================
// COCO annotation documents (segmentation subset)
// http://cocodataset.org/#format-data
// ============================================================================

use serde::Deserialize;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum CocoError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("malformed COCO JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

/// The parts of a COCO document the mask rasterizer needs.
#[derive(Debug, Clone, Deserialize)]
pub struct CocoDataset {
    #[serde(default)]
    pub images: Vec<CocoImage>,
    #[serde(default)]
    pub annotations: Vec<CocoAnnotation>,
    #[serde(default)]
    pub categories: Vec<CocoCategory>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CocoImage {
    pub id: u64,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub file_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CocoAnnotation {
    pub image_id: u64,
    pub category_id: u64,
    pub segmentation: Segmentation,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CocoCategory {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Segmentation {
    /// Polygon form: each polygon is a flat `[x0, y0, x1, y1, ...]` list.
    Polygons(Vec<Vec<f64>>),
    /// Run-length form, used for crowd annotations. `size` is `[height, width]`.
    Rle { size: [u32; 2], counts: RleCounts },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RleCounts {
    Uncompressed(Vec<u32>),
    /// The LEB128-like ASCII form written by pycocotools.
    Compressed(String),
}

impl RleCounts {
    /// Run lengths, alternating background / foreground, starting with background.
    pub fn runs(&self) -> Vec<u32> {
        match self {
            RleCounts::Uncompressed(counts) => counts.clone(),
            RleCounts::Compressed(s) => decode_compressed_counts(s),
        }
    }
}

impl CocoDataset {
    pub fn load(path: &Path) -> Result<Self, CocoError> {
        let file = File::open(path).map_err(|source| CocoError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    pub fn from_json(json: &str) -> Result<Self, CocoError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Annotations attached to `image_id`, in document order.
    pub fn annotations_for(&self, image_id: u64) -> impl Iterator<Item = &CocoAnnotation> {
        self.annotations
            .iter()
            .filter(move |a| a.image_id == image_id)
    }

    pub fn category_name(&self, category_id: u64) -> Option<&str> {
        self.categories
            .iter()
            .find(|c| c.id == category_id)
            .map(|c| c.name.as_str())
    }
}

/// Decode the compressed COCO counts string.
///
/// Each count is a little-endian sequence of 5-bit groups offset by 48 ('0');
/// bit 0x20 marks continuation and the top bit of the last group is the sign.
/// From the fourth count on, values are stored as deltas against the count two
/// positions earlier.
fn decode_compressed_counts(s: &str) -> Vec<u32> {
    let bytes = s.as_bytes();
    let mut counts: Vec<u32> = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let mut x: i64 = 0;
        let mut shift = 0;
        let mut more = true;
        while more && i < bytes.len() {
            let c = (bytes[i] as i64) - 48;
            i += 1;
            x |= (c & 0x1f) << shift;
            more = (c & 0x20) != 0;
            shift += 5;
            if !more && (c & 0x10) != 0 {
                x |= -1i64 << shift;
            }
        }
        let m = counts.len();
        if m > 2 {
            x += counts[m - 2] as i64;
        }
        counts.push(x.max(0) as u32);
    }

    counts
}
