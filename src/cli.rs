// ============================================================================
// scenedit CLI — mask export and scene editing from the command line
// ============================================================================
//
// Usage examples:
//   scenedit masks -i assets/result_coco.json --output-dir outputs --preview
//   scenedit masks -i "annotations/*.json"
//   scenedit edit --image assets/scene.jpg --mask outputs/mask_0.png -n 5
//   scenedit edit --image scene.jpg --mask mask_0.png --model sd-inpaint.ckpt --labels car,sky,tree
//   scenedit edit --image scene.jpg --mask mask_0.png -n 20 --dry-run
//
// Everything runs synchronously on the current thread.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use clap::{Args, Parser, Subcommand};

use crate::coco::CocoDataset;
use crate::ops::diffusion::{
    DEFAULT_MODEL_FILE, DEFAULT_MODEL_REPO, DEFAULT_SD_BINARY, InpaintSettings, ModelSource,
    load_pipeline,
};
use crate::ops::editing::{EditConfig, plan, run_scene_editing};
use crate::ops::prompts::Label;
use crate::ops::rasterize::{MaskExportOptions, export_masks};
use crate::{log_err, log_info};

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// Label masks from COCO polygons and diffusion-based scene recolouring.
#[derive(Parser, Debug)]
#[command(
    name = "scenedit",
    about = "COCO label masks and diffusion-based scene editing",
    long_about = "Rasterize COCO segmentation polygons into multiclass label masks, then\n\
                  repaint pairs of labelled regions (car, sky, tree, building, road,\n\
                  footpath) of a scene photo with an inpainting model.\n\n\
                  Example:\n  \
                  scenedit masks -i assets/result_coco.json --output-dir outputs\n  \
                  scenedit edit --image assets/scene.jpg --mask outputs/mask_0.png -n 5"
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Convert COCO annotation files into `mask_<image_id>.png` label masks.
    Masks(MasksArgs),
    /// Generate edited variations of a scene photo.
    Edit(EditArgs),
}

#[derive(Args, Debug)]
pub struct MasksArgs {
    /// COCO JSON file(s). Glob patterns accepted (e.g. "annotations/*.json").
    #[arg(short, long, required = true, num_args = 1..)]
    pub input: Vec<String>,

    /// Directory the mask files are written to.
    #[arg(long, value_name = "DIR", default_value = "outputs")]
    pub output_dir: PathBuf,

    /// Also write a colour-coded `mask_<image_id>_preview.png` per image.
    #[arg(long)]
    pub preview: bool,

    /// Print every mask written.
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Args, Debug)]
pub struct EditArgs {
    /// Scene photo to edit.
    #[arg(long, value_name = "FILE", default_value = "assets/scene.jpg")]
    pub image: PathBuf,

    /// Label mask of the scene (as written by `scenedit masks`).
    #[arg(long, value_name = "FILE", default_value = "assets/mask_0.png")]
    pub mask: PathBuf,

    /// Directory the `output_NN.png` files are written to.
    #[arg(long, value_name = "DIR", default_value = "outputs")]
    pub output_dir: PathBuf,

    /// Number of variations to generate.
    #[arg(short = 'n', long, default_value_t = 10)]
    pub num_images: usize,

    /// Seed for the label pair order.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Hugging Face access token for gated model downloads.
    #[arg(long, value_name = "TOKEN")]
    pub hf_token: Option<String>,

    /// Inpainting backend executable (stable-diffusion.cpp compatible).
    #[arg(long, value_name = "PATH", default_value = DEFAULT_SD_BINARY)]
    pub sd_binary: PathBuf,

    /// Local checkpoint. When omitted the checkpoint is fetched from the hub.
    #[arg(long, value_name = "FILE")]
    pub model: Option<PathBuf>,

    /// Hub repository holding the checkpoint.
    #[arg(long, value_name = "REPO", default_value = DEFAULT_MODEL_REPO, conflicts_with = "model")]
    pub model_repo: String,

    /// Checkpoint file name inside the hub repository.
    #[arg(long, value_name = "FILE", default_value = DEFAULT_MODEL_FILE, conflicts_with = "model")]
    pub model_file: String,

    /// Denoising steps per inpainting call.
    #[arg(long, default_value_t = 20)]
    pub steps: u32,

    /// Guidance scale.
    #[arg(long, default_value_t = 4.0)]
    pub guidance: f32,

    /// Square working resolution of the model (a positive multiple of 8).
    #[arg(long, default_value_t = 512, value_parser = parse_resolution)]
    pub resolution: u32,

    /// Labels to pair up, by name or id (default: car,sky,tree,building,road,footpath).
    #[arg(long, value_delimiter = ',', value_name = "LABELS")]
    pub labels: Vec<Label>,

    /// Print the label pair schedule without loading the model.
    #[arg(long)]
    pub dry_run: bool,

    /// Print prompts and per-output timing.
    #[arg(short, long)]
    pub verbose: bool,
}

impl EditArgs {
    pub fn to_config(&self) -> EditConfig {
        EditConfig {
            image_path: self.image.clone(),
            mask_path: self.mask.clone(),
            output_dir: self.output_dir.clone(),
            num_images: self.num_images,
            seed: self.seed,
            hf_token: self.hf_token.clone(),
            settings: InpaintSettings {
                steps: self.steps,
                guidance: self.guidance,
                resolution: self.resolution,
            },
            labels: if self.labels.is_empty() {
                Label::ACTIVE.to_vec()
            } else {
                self.labels.clone()
            },
        }
    }

    pub fn model_source(&self) -> ModelSource {
        match &self.model {
            Some(path) => ModelSource::Local(path.clone()),
            None => ModelSource::Hub {
                repo: self.model_repo.clone(),
                file: self.model_file.clone(),
            },
        }
    }
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run one subcommand and return an OS exit code.
pub fn run(args: CliArgs) -> ExitCode {
    match args.command {
        CliCommand::Masks(masks) => run_masks(&masks),
        CliCommand::Edit(edit) => run_edit(&edit),
    }
}

fn run_masks(args: &MasksArgs) -> ExitCode {
    let inputs = resolve_inputs(&args.input);
    if inputs.is_empty() {
        eprintln!("error: no annotation files matched the given pattern(s).");
        return ExitCode::FAILURE;
    }

    let options = MaskExportOptions {
        preview: args.preview,
    };
    let total = inputs.len();
    let mut any_failure = false;

    for (idx, input) in inputs.iter().enumerate() {
        if total > 1 || args.verbose {
            println!("[{}/{}] {}", idx + 1, total, input.display());
        }
        let start = Instant::now();

        let result = CocoDataset::load(input)
            .map_err(|e| e.to_string())
            .and_then(|ds| export_masks(&ds, &args.output_dir, options).map_err(|e| e.to_string()));

        match result {
            Ok(written) => {
                if args.verbose {
                    for mask in &written {
                        println!("  → {}", mask.path.display());
                    }
                }
                log_info!(
                    "{}: {} masks in {:.0}ms",
                    input.display(),
                    written.len(),
                    start.elapsed().as_secs_f64() * 1000.0
                );
            }
            Err(e) => {
                eprintln!("  error: {}: {}", input.display(), e);
                log_err!("{}: {}", input.display(), e);
                any_failure = true;
            }
        }
    }

    println!("Saved all masks to {}", args.output_dir.display());
    if any_failure { ExitCode::FAILURE } else { ExitCode::SUCCESS }
}

fn run_edit(args: &EditArgs) -> ExitCode {
    let config = args.to_config();

    if args.dry_run {
        return match plan(&config.labels, config.seed, config.num_images) {
            Ok(schedule) => {
                for edit in schedule {
                    println!(
                        "{:>3}  {} then {}",
                        edit.index, edit.first, edit.second
                    );
                }
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("error: {}", e);
                ExitCode::FAILURE
            }
        };
    }

    let load_start = Instant::now();
    let model = match load_pipeline(&args.sd_binary, &args.model_source(), config.hf_token.as_deref()) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("error: could not load inpainting model: {}", e);
            log_err!("model load failed: {}", e);
            return ExitCode::FAILURE;
        }
    };
    log_info!(
        "model {} ready in {:.1}s",
        model.model().display(),
        load_start.elapsed().as_secs_f64()
    );

    let mut last = Instant::now();
    let result = run_scene_editing(&config, model, |out| {
        println!(
            "[{}/{}] {} and {} → {}",
            out.index,
            out.total,
            out.first,
            out.second,
            out.path.display()
        );
        if args.verbose {
            println!("  {}", out.first_prompt);
            println!("  {}", out.second_prompt);
            println!("  ({:.1}s)", last.elapsed().as_secs_f64());
        }
        last = Instant::now();
    });

    match result {
        Ok(paths) => {
            println!("Scene editing complete: {} images in {}", paths.len(), display_dir(&config.output_dir));
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {}", e);
            log_err!("scene editing aborted: {}", e);
            ExitCode::FAILURE
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Expand glob patterns and literal paths into a deduplicated, ordered list.
fn resolve_inputs(patterns: &[String]) -> Vec<PathBuf> {
    let mut result: Vec<PathBuf> = Vec::new();

    for pattern in patterns {
        let as_path = Path::new(pattern);

        if as_path.exists() {
            if !result.iter().any(|p| p.as_path() == as_path) {
                result.push(as_path.to_path_buf());
            }
            continue;
        }

        match glob::glob(pattern) {
            Ok(entries) => {
                let mut matched = false;
                for entry in entries.flatten() {
                    if !result.contains(&entry) {
                        result.push(entry);
                    }
                    matched = true;
                }
                if !matched {
                    eprintln!("warning: pattern '{}' matched no files.", pattern);
                }
            }
            Err(e) => {
                eprintln!("warning: invalid glob '{}': {}", pattern, e);
            }
        }
    }

    result
}

fn parse_resolution(s: &str) -> Result<u32, String> {
    let side: u32 = s.parse().map_err(|e| format!("{}", e))?;
    if side == 0 || side % 8 != 0 {
        return Err(format!("{} is not a positive multiple of 8", side));
    }
    Ok(side)
}

fn display_dir(dir: &Path) -> String {
    let s = dir.display().to_string();
    if s.is_empty() { ".".to_string() } else { s }
}
