// ============================================================================
// DIFFUSION INPAINTING — backend seam and the external-process implementation
// ============================================================================
//
// The diffusion model itself is never linked into this binary. The default
// backend drives a stable-diffusion.cpp style executable (`sd`) once per
// inpainting stage, exchanging the image and mask as PNG files through a
// scratch directory owned by the handle. The checkpoint is either a local file
// or fetched once from the Hugging Face hub.

use image::{GrayImage, RgbImage};
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};
use std::process::Command;

use crate::io::{MaskIoError, load_scene, save_mask, save_scene};
use crate::{log_info, log_warn};

/// Default checkpoint location on the Hugging Face hub.
pub const DEFAULT_MODEL_REPO: &str = "runwayml/stable-diffusion-inpainting";
pub const DEFAULT_MODEL_FILE: &str = "sd-v1-5-inpainting.ckpt";

/// Default backend executable, resolved through `PATH` when not a path.
pub const DEFAULT_SD_BINARY: &str = "sd";

/// Parameters shared by every inpainting call of a session.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InpaintSettings {
    /// Denoising steps per call.
    pub steps: u32,
    /// Classifier-free guidance scale.
    pub guidance: f32,
    /// Side length of the square working resolution. Image and mask are
    /// resized to this before every call.
    pub resolution: u32,
}

impl Default for InpaintSettings {
    fn default() -> Self {
        Self {
            steps: 20,
            guidance: 4.0,
            resolution: 512,
        }
    }
}

impl InpaintSettings {
    pub fn validate(&self) -> Result<(), InpaintError> {
        if self.resolution == 0 {
            return Err(InpaintError::InvalidSettings(
                "working resolution must be positive".to_string(),
            ));
        }
        if self.steps == 0 {
            return Err(InpaintError::InvalidSettings(
                "at least one denoising step is needed".to_string(),
            ));
        }
        Ok(())
    }
}

/// One inpainting call. `image` and `mask` have the same dimensions; mask
/// pixels of 255 mark the region the model may repaint.
#[derive(Clone, Copy, Debug)]
pub struct InpaintRequest<'a> {
    pub image: &'a RgbImage,
    pub mask: &'a GrayImage,
    pub prompt: &'a str,
    pub negative_prompt: &'a str,
    pub steps: u32,
    pub guidance: f32,
}

/// A loaded inpainting model. Loaded once per session and reused for every
/// stage; calls are strictly sequential.
pub trait Inpainter {
    fn inpaint(&mut self, request: &InpaintRequest<'_>) -> Result<RgbImage, InpaintError>;
}

impl<T: Inpainter + ?Sized> Inpainter for Box<T> {
    fn inpaint(&mut self, request: &InpaintRequest<'_>) -> Result<RgbImage, InpaintError> {
        (**self).inpaint(request)
    }
}

impl<T: Inpainter + ?Sized> Inpainter for &mut T {
    fn inpaint(&mut self, request: &InpaintRequest<'_>) -> Result<RgbImage, InpaintError> {
        (**self).inpaint(request)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InpaintError {
    #[error("invalid inpainting settings: {0}")]
    InvalidSettings(String),
    #[error("inpainting backend not found: {0}")]
    BinaryNotFound(String),
    #[error("invalid backend path: {0}")]
    InvalidPath(String),
    #[error("model checkpoint not found: {0}")]
    ModelNotFound(String),
    #[error("model download failed: {0}")]
    Download(#[from] hf_hub::api::sync::ApiError),
    #[error("could not prepare backend scratch space: {0}")]
    Scratch(std::io::Error),
    #[error("failed to launch {binary}: {source}")]
    Spawn {
        binary: String,
        source: std::io::Error,
    },
    #[error("backend exited with {status}: {stderr}")]
    ProcessFailed { status: String, stderr: String },
    #[error("backend produced no usable image: {0}")]
    InvalidOutput(String),
    #[error(transparent)]
    Image(#[from] MaskIoError),
}

// ============================================================================
// MODEL CHECKPOINT
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModelSource {
    /// A checkpoint already on disk.
    Local(PathBuf),
    /// A file in a Hugging Face model repository, cached after first download.
    Hub { repo: String, file: String },
}

impl Default for ModelSource {
    fn default() -> Self {
        ModelSource::Hub {
            repo: DEFAULT_MODEL_REPO.to_string(),
            file: DEFAULT_MODEL_FILE.to_string(),
        }
    }
}

/// Resolve the checkpoint to a local path, downloading it if needed.
/// `hf_token` authenticates hub requests for gated repositories.
pub fn resolve_model(source: &ModelSource, hf_token: Option<&str>) -> Result<PathBuf, InpaintError> {
    match source {
        ModelSource::Local(path) => {
            if path.is_file() {
                Ok(path.clone())
            } else {
                Err(InpaintError::ModelNotFound(path.display().to_string()))
            }
        }
        ModelSource::Hub { repo, file } => {
            log_info!("fetching {}/{} from the hub", repo, file);
            let api = hf_hub::api::sync::ApiBuilder::new()
                .with_token(hf_token.map(str::to_string))
                .with_progress(true)
                .build()?;
            let path = api.model(repo.clone()).get(file)?;
            log_info!("checkpoint at {}", path.display());
            Ok(path)
        }
    }
}

/// Check a backend executable path before running it:
/// - must not be empty
/// - must not contain `..` components
/// - when it names a file (not a bare command), that file must exist
pub fn validate_binary_path(path: &Path) -> Result<(), InpaintError> {
    if path.as_os_str().is_empty() {
        return Err(InpaintError::InvalidPath("path is empty".to_string()));
    }

    if path.components().any(|c| c == Component::ParentDir) {
        return Err(InpaintError::InvalidPath(format!(
            "{} must not contain '..' components",
            path.display()
        )));
    }

    // A bare command name is looked up on PATH by the OS at spawn time
    if path.components().count() == 1 && !path.is_absolute() {
        return Ok(());
    }

    if !path.is_file() {
        return Err(InpaintError::BinaryNotFound(path.display().to_string()));
    }
    Ok(())
}

// ============================================================================
// EXTERNAL PROCESS BACKEND
// ============================================================================

/// Inpainting through a stable-diffusion.cpp compatible command line tool,
/// run in img2img mode with a mask.
#[derive(Debug)]
pub struct SdCliInpainter {
    binary: PathBuf,
    model: PathBuf,
    scratch: tempfile::TempDir,
    calls: u64,
}

impl SdCliInpainter {
    pub fn new(binary: impl Into<PathBuf>, model: impl Into<PathBuf>) -> Result<Self, InpaintError> {
        let binary = binary.into();
        let model = model.into();
        validate_binary_path(&binary)?;
        if !model.is_file() {
            return Err(InpaintError::ModelNotFound(model.display().to_string()));
        }

        let scratch = tempfile::Builder::new()
            .prefix("scenedit-")
            .tempdir()
            .map_err(InpaintError::Scratch)?;

        Ok(Self {
            binary,
            model,
            scratch,
            calls: 0,
        })
    }

    pub fn model(&self) -> &Path {
        &self.model
    }

    /// Arguments for one call. Seed -1 asks the backend for a fresh random seed.
    fn command_args(
        &self,
        request: &InpaintRequest<'_>,
        init: &Path,
        mask: &Path,
        output: &Path,
    ) -> Vec<OsString> {
        let (w, h) = request.image.dimensions();
        let mut args: Vec<OsString> = Vec::new();
        let mut push = |flag: &str, value: OsString| {
            args.push(flag.into());
            args.push(value);
        };
        push("--mode", "img2img".into());
        push("--model", self.model.clone().into_os_string());
        push("--init-img", init.as_os_str().to_owned());
        push("--mask", mask.as_os_str().to_owned());
        push("--prompt", request.prompt.into());
        push("--negative-prompt", request.negative_prompt.into());
        push("--steps", request.steps.to_string().into());
        push("--cfg-scale", request.guidance.to_string().into());
        push("--strength", "1.0".into());
        push("--width", w.to_string().into());
        push("--height", h.to_string().into());
        push("--seed", "-1".into());
        push("--output", output.as_os_str().to_owned());
        args
    }
}

impl Inpainter for SdCliInpainter {
    fn inpaint(&mut self, request: &InpaintRequest<'_>) -> Result<RgbImage, InpaintError> {
        self.calls += 1;
        let dir = self.scratch.path();
        let init = dir.join(format!("init_{:04}.png", self.calls));
        let mask = dir.join(format!("mask_{:04}.png", self.calls));
        let output = dir.join(format!("out_{:04}.png", self.calls));

        save_scene(request.image, &init)?;
        save_mask(request.mask, &mask)?;

        let args = self.command_args(request, &init, &mask, &output);
        log_info!(
            "inpaint call {}: {} ({} steps, cfg {})",
            self.calls,
            request.prompt,
            request.steps,
            request.guidance
        );

        let result = Command::new(&self.binary)
            .args(&args)
            .output()
            .map_err(|source| InpaintError::Spawn {
                binary: self.binary.display().to_string(),
                source,
            })?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr).trim().to_string();
            return Err(InpaintError::ProcessFailed {
                status: result.status.to_string(),
                stderr,
            });
        }

        if !output.is_file() {
            return Err(InpaintError::InvalidOutput(format!(
                "{} was not written",
                output.display()
            )));
        }
        let image = load_scene(&output)?;

        // Scratch files are only needed for the duration of one call
        for path in [&init, &mask, &output] {
            if let Err(e) = std::fs::remove_file(path) {
                log_warn!("could not remove {}: {}", path.display(), e);
            }
        }

        Ok(image)
    }
}

/// Load the inpainting pipeline: resolve the checkpoint (downloading it with
/// the optional token) and bind it to the backend executable.
pub fn load_pipeline(
    binary: &Path,
    source: &ModelSource,
    hf_token: Option<&str>,
) -> Result<SdCliInpainter, InpaintError> {
    validate_binary_path(binary)?;
    let model = resolve_model(source, hf_token)?;
    SdCliInpainter::new(binary, model)
}
