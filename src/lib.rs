//! COCO label masks and diffusion-based scene editing.
//!
//! [`ops::rasterize`] turns COCO segmentations into multiclass label masks;
//! [`ops::editing`] repaints pairs of labelled regions of a scene photo through
//! an [`ops::diffusion::Inpainter`], with prompts from [`ops::prompts`].

pub mod logger;

pub mod cli;
pub mod coco;
pub mod io;
pub mod ops;
