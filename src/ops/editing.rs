// ============================================================================
// Scene editing — two label edits per output, driven by a seeded pair schedule
// ============================================================================
//
// For every requested output one pair of labels is taken from a seeded shuffle
// of all label pairs. The first label's region is repainted on the original
// photo, then the second label's region is repainted on that intermediate
// result. Both binary masks always come from the original label mask.

use image::imageops::{self, FilterType};
use image::{GrayImage, RgbImage};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{RngCore, SeedableRng};
use std::path::{Path, PathBuf};

use crate::io::{MaskIoError, binarize, load_mask, load_scene, save_scene};
use crate::ops::diffusion::{InpaintError, InpaintRequest, InpaintSettings, Inpainter};
use crate::ops::prompts::{Label, NEGATIVE_PROMPT, PromptError, generate_prompt};
use crate::{log_info, log_warn};

#[derive(Debug, thiserror::Error)]
pub enum EditError {
    #[error("need at least two editable labels to form pairs, got {0}")]
    NotEnoughLabels(usize),
    #[error("could not create output directory {path}: {source}")]
    OutputDir {
        path: String,
        source: std::io::Error,
    },
    #[error(transparent)]
    Image(#[from] MaskIoError),
    #[error(transparent)]
    Prompt(#[from] PromptError),
    #[error(transparent)]
    Inpaint(#[from] InpaintError),
}

/// Everything a scene editing run needs besides the loaded model.
#[derive(Clone, Debug)]
pub struct EditConfig {
    pub image_path: PathBuf,
    pub mask_path: PathBuf,
    pub output_dir: PathBuf,
    pub num_images: usize,
    /// Seeds the pair shuffle only; prompt phrasing stays random.
    pub seed: u64,
    /// Credential for gated model downloads.
    pub hf_token: Option<String>,
    pub settings: InpaintSettings,
    /// Labels eligible for editing. Each must have a prompt template.
    pub labels: Vec<Label>,
}

impl Default for EditConfig {
    fn default() -> Self {
        Self {
            image_path: PathBuf::from("assets/scene.jpg"),
            mask_path: PathBuf::from("assets/mask_0.png"),
            output_dir: PathBuf::from("outputs"),
            num_images: 10,
            seed: 42,
            hf_token: None,
            settings: InpaintSettings::default(),
            labels: Label::ACTIVE.to_vec(),
        }
    }
}

// ============================================================================
// Pair schedule
// ============================================================================

/// One scheduled output: which labels get edited, in which order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlannedEdit {
    /// 1-based output number, as used in the file name.
    pub index: usize,
    pub first: Label,
    pub second: Label,
}

/// All unordered pairs `(a, b)` with `a` listed before `b`, in combination order.
pub fn label_pairs(labels: &[Label]) -> Vec<(Label, Label)> {
    let mut pairs = Vec::with_capacity(labels.len() * labels.len().saturating_sub(1) / 2);
    for (i, &a) in labels.iter().enumerate() {
        for &b in &labels[i + 1..] {
            pairs.push((a, b));
        }
    }
    pairs
}

/// [`label_pairs`] shuffled once by a generator seeded with `seed`.
pub fn shuffled_pairs(labels: &[Label], seed: u64) -> Vec<(Label, Label)> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut pairs = label_pairs(labels);
    pairs.shuffle(&mut rng);
    pairs
}

/// Reject labels without a prompt template and drop repeats, keeping order.
fn editable_labels(labels: &[Label]) -> Result<Vec<Label>, EditError> {
    let mut out: Vec<Label> = Vec::with_capacity(labels.len());
    for &label in labels {
        if !label.is_active() {
            return Err(PromptError::NoTemplate(label).into());
        }
        if !out.contains(&label) {
            out.push(label);
        }
    }
    if out.len() < 2 {
        return Err(EditError::NotEnoughLabels(out.len()));
    }
    Ok(out)
}

/// The deterministic schedule for `count` outputs. Output `i` (0-based) uses
/// pair `i mod pair_count`, so pairs repeat once `count` exceeds the number
/// of distinct pairs.
pub fn plan(labels: &[Label], seed: u64, count: usize) -> Result<Vec<PlannedEdit>, EditError> {
    let labels = editable_labels(labels)?;
    let pairs = shuffled_pairs(&labels, seed);
    if count > pairs.len() {
        log_warn!(
            "{} outputs requested but only {} distinct label pairs; pairs will repeat",
            count,
            pairs.len()
        );
    }

    Ok((0..count)
        .map(|i| {
            let (first, second) = pairs[i % pairs.len()];
            PlannedEdit {
                index: i + 1,
                first,
                second,
            }
        })
        .collect())
}

pub fn output_file_name(index: usize) -> String {
    format!("output_{:02}.png", index)
}

// ============================================================================
// Editor
// ============================================================================

/// Reported after each output image is written.
#[derive(Clone, Debug)]
pub struct EditedOutput {
    pub index: usize,
    pub total: usize,
    pub first: Label,
    pub second: Label,
    pub first_prompt: String,
    pub second_prompt: String,
    pub path: PathBuf,
}

/// Owns the model handle, the original photo and its label mask for a session.
pub struct SceneEditor<I: Inpainter> {
    model: I,
    scene: RgbImage,
    mask: GrayImage,
    settings: InpaintSettings,
    prompt_rng: Box<dyn RngCore>,
}

impl<I: Inpainter> SceneEditor<I> {
    pub fn new(model: I, scene: RgbImage, mask: GrayImage, settings: InpaintSettings) -> Self {
        Self {
            model,
            scene,
            mask,
            settings,
            prompt_rng: Box::new(StdRng::from_entropy()),
        }
    }

    pub fn from_files(
        model: I,
        image_path: &Path,
        mask_path: &Path,
        settings: InpaintSettings,
    ) -> Result<Self, EditError> {
        let mask = load_mask(mask_path)?;
        let scene = load_scene(image_path)?;
        log_info!(
            "scene {} ({}x{}), mask {} ({}x{})",
            image_path.display(),
            scene.width(),
            scene.height(),
            mask_path.display(),
            mask.width(),
            mask.height()
        );
        Ok(Self::new(model, scene, mask, settings))
    }

    /// Replace the source of prompt phrasing randomness.
    pub fn with_prompt_rng(mut self, rng: impl RngCore + 'static) -> Self {
        self.prompt_rng = Box::new(rng);
        self
    }

    pub fn model(&self) -> &I {
        &self.model
    }

    /// Repaint the region of `label` on `current` according to `prompt`.
    /// The region comes from the original mask; both image and region are
    /// brought to the working resolution first.
    pub fn inpaint_stage(
        &mut self,
        current: &RgbImage,
        label: Label,
        prompt: &str,
    ) -> Result<RgbImage, EditError> {
        self.settings.validate()?;
        let side = self.settings.resolution;
        let region = binarize(&self.mask, label.id());
        let region = resize_to(&region, side, FilterType::Nearest);
        let image = resize_to(current, side, FilterType::CatmullRom);

        let request = InpaintRequest {
            image: &image,
            mask: &region,
            prompt,
            negative_prompt: NEGATIVE_PROMPT,
            steps: self.settings.steps,
            guidance: self.settings.guidance,
        };
        Ok(self.model.inpaint(&request)?)
    }

    /// Both stages for one pair. Returns the final image and the prompts used.
    pub fn edit_pair(
        &mut self,
        first: Label,
        second: Label,
    ) -> Result<(RgbImage, String, String), EditError> {
        let first_prompt = generate_prompt(first, &mut *self.prompt_rng)?;
        let original = self.scene.clone();
        let intermediate = self.inpaint_stage(&original, first, &first_prompt)?;

        let second_prompt = generate_prompt(second, &mut *self.prompt_rng)?;
        let last = self.inpaint_stage(&intermediate, second, &second_prompt)?;

        Ok((last, first_prompt, second_prompt))
    }

    /// Produce `count` outputs into `output_dir` as `output_01.png`, ...
    /// The first failure aborts the run; earlier outputs stay on disk.
    pub fn run(
        &mut self,
        labels: &[Label],
        seed: u64,
        count: usize,
        output_dir: &Path,
        mut on_output: impl FnMut(&EditedOutput),
    ) -> Result<Vec<PathBuf>, EditError> {
        self.settings.validate()?;
        std::fs::create_dir_all(output_dir).map_err(|source| EditError::OutputDir {
            path: output_dir.display().to_string(),
            source,
        })?;

        let schedule = plan(labels, seed, count)?;
        let mut written = Vec::with_capacity(schedule.len());

        for edit in schedule {
            log_info!(
                "variation {}/{}: {} then {}",
                edit.index,
                count,
                edit.first,
                edit.second
            );
            let (image, first_prompt, second_prompt) = self.edit_pair(edit.first, edit.second)?;

            let path = output_dir.join(output_file_name(edit.index));
            save_scene(&image, &path)?;
            log_info!("saved {}", path.display());

            on_output(&EditedOutput {
                index: edit.index,
                total: count,
                first: edit.first,
                second: edit.second,
                first_prompt,
                second_prompt,
                path: path.clone(),
            });
            written.push(path);
        }

        Ok(written)
    }
}

fn resize_to<P>(
    img: &image::ImageBuffer<P, Vec<u8>>,
    side: u32,
    filter: FilterType,
) -> image::ImageBuffer<P, Vec<u8>>
where
    P: image::Pixel<Subpixel = u8> + 'static,
{
    if img.dimensions() == (side, side) {
        img.clone()
    } else {
        imageops::resize(img, side, side, filter)
    }
}

/// Load the scene and mask named in `config` and write all outputs with
/// `model`. Returns the written paths in order.
pub fn run_scene_editing<I: Inpainter>(
    config: &EditConfig,
    model: I,
    on_output: impl FnMut(&EditedOutput),
) -> Result<Vec<PathBuf>, EditError> {
    let mut editor = SceneEditor::from_files(model, &config.image_path, &config.mask_path, config.settings)?;
    editor.run(
        &config.labels,
        config.seed,
        config.num_images,
        &config.output_dir,
        on_output,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb};

    /// Paints the masked region with a per-call colour and records what it saw.
    #[derive(Default)]
    struct RecordingInpainter {
        calls: Vec<(String, GrayImage, RgbImage)>,
    }

    impl Inpainter for RecordingInpainter {
        fn inpaint(&mut self, request: &InpaintRequest<'_>) -> Result<RgbImage, InpaintError> {
            self.calls.push((
                request.prompt.to_string(),
                request.mask.clone(),
                request.image.clone(),
            ));
            let shade = self.calls.len() as u8 * 10;
            let mut out = request.image.clone();
            for (x, y, m) in request.mask.enumerate_pixels() {
                if m.0[0] == 255 {
                    out.put_pixel(x, y, Rgb([shade, shade, shade]));
                }
            }
            Ok(out)
        }
    }

    struct FailingInpainter {
        fail_on: usize,
        seen: usize,
    }

    impl Inpainter for FailingInpainter {
        fn inpaint(&mut self, request: &InpaintRequest<'_>) -> Result<RgbImage, InpaintError> {
            self.seen += 1;
            if self.seen == self.fail_on {
                return Err(InpaintError::InvalidOutput("simulated".to_string()));
            }
            Ok(request.image.clone())
        }
    }

    fn small_settings() -> InpaintSettings {
        InpaintSettings {
            steps: 1,
            guidance: 1.0,
            resolution: 4,
        }
    }

    /// Left half car (1), right half sky (2), bottom row road (6).
    fn scene_mask() -> GrayImage {
        GrayImage::from_fn(4, 4, |x, y| {
            if y == 3 {
                Luma([6])
            } else if x < 2 {
                Luma([1])
            } else {
                Luma([2])
            }
        })
    }

    #[test]
    fn six_labels_give_fifteen_pairs() {
        let pairs = label_pairs(&Label::ACTIVE);
        assert_eq!(pairs.len(), 15);
        assert_eq!(pairs[0], (Label::Car, Label::Sky));
        assert_eq!(pairs[14], (Label::Road, Label::Footpath));
        assert!(pairs.iter().all(|(a, b)| a < b));
    }

    #[test]
    fn shuffle_is_seed_deterministic() {
        let a = shuffled_pairs(&Label::ACTIVE, 42);
        let b = shuffled_pairs(&Label::ACTIVE, 42);
        assert_eq!(a, b);

        let mut sorted = a.clone();
        sorted.sort();
        assert_eq!(sorted, label_pairs(&Label::ACTIVE));
    }

    #[test]
    fn plan_wraps_past_the_pair_count() {
        let schedule = plan(&Label::ACTIVE, 42, 16).unwrap();
        assert_eq!(schedule.len(), 16);
        assert_eq!(schedule[0].index, 1);
        assert_eq!(schedule[15].index, 16);
        assert_eq!(
            (schedule[15].first, schedule[15].second),
            (schedule[0].first, schedule[0].second)
        );

        let shuffled = shuffled_pairs(&Label::ACTIVE, 42);
        for (i, edit) in schedule.iter().enumerate() {
            assert_eq!((edit.first, edit.second), shuffled[i % shuffled.len()]);
        }
    }

    #[test]
    fn plan_rejects_uneditable_labels() {
        assert!(matches!(
            plan(&[Label::Car, Label::Signs], 1, 1),
            Err(EditError::Prompt(PromptError::NoTemplate(Label::Signs)))
        ));
        assert!(matches!(
            plan(&[Label::Car, Label::Car], 1, 1),
            Err(EditError::NotEnoughLabels(1))
        ));
    }

    #[test]
    fn output_names_are_zero_padded() {
        assert_eq!(output_file_name(1), "output_01.png");
        assert_eq!(output_file_name(12), "output_12.png");
        assert_eq!(output_file_name(123), "output_123.png");
    }

    #[test]
    fn stages_use_original_mask_and_chain_images() {
        let scene = RgbImage::from_pixel(4, 4, Rgb([200, 200, 200]));
        let mut editor = SceneEditor::new(
            RecordingInpainter::default(),
            scene.clone(),
            scene_mask(),
            small_settings(),
        )
        .with_prompt_rng(StdRng::seed_from_u64(3));

        let (result, p1, p2) = editor.edit_pair(Label::Car, Label::Sky).unwrap();
        let calls = &editor.model().calls;
        assert_eq!(calls.len(), 2);

        // Stage A: car region on the untouched photo
        assert_eq!(calls[0].0, p1);
        assert!(p1.starts_with("the car should be "));
        assert_eq!(calls[0].1, binarize(&scene_mask(), 1));
        assert_eq!(calls[0].2, scene);

        // Stage B: sky region on stage A's output
        assert!(p2.starts_with("the sky should be "));
        assert_eq!(calls[1].1, binarize(&scene_mask(), 2));
        assert_eq!(calls[1].2.get_pixel(0, 0), &Rgb([10, 10, 10]));
        assert_eq!(calls[1].2.get_pixel(3, 0), &Rgb([200, 200, 200]));

        assert_eq!(result.get_pixel(0, 0), &Rgb([10, 10, 10]));
        assert_eq!(result.get_pixel(3, 0), &Rgb([20, 20, 20]));
        assert_eq!(result.get_pixel(0, 3), &Rgb([200, 200, 200]));
    }

    #[test]
    fn stages_work_at_model_resolution() {
        let scene = RgbImage::from_pixel(8, 6, Rgb([50, 60, 70]));
        let mask = GrayImage::from_pixel(8, 6, Luma([3]));
        let mut editor = SceneEditor::new(
            RecordingInpainter::default(),
            scene,
            mask,
            small_settings(),
        );
        let (result, _, _) = editor.edit_pair(Label::Tree, Label::Road).unwrap();

        let calls = &editor.model().calls;
        assert_eq!(calls[0].2.dimensions(), (4, 4));
        assert!(calls[0].1.pixels().all(|p| p.0[0] == 255));
        assert!(calls[1].1.pixels().all(|p| p.0[0] == 0));
        assert_eq!(result.dimensions(), (4, 4));
    }

    #[test]
    fn zero_resolution_is_rejected_before_any_call() {
        let scene = RgbImage::from_pixel(4, 4, Rgb([9, 9, 9]));
        let settings = InpaintSettings {
            resolution: 0,
            ..small_settings()
        };
        let mut editor = SceneEditor::new(RecordingInpainter::default(), scene, scene_mask(), settings);

        assert!(matches!(
            editor.edit_pair(Label::Car, Label::Sky),
            Err(EditError::Inpaint(InpaintError::InvalidSettings(_)))
        ));
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        assert!(editor.run(&Label::ACTIVE, 1, 1, &out, |_| {}).is_err());
        assert!(!out.exists());
        assert!(editor.model().calls.is_empty());
    }

    #[test]
    fn run_writes_numbered_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let scene = RgbImage::from_pixel(4, 4, Rgb([9, 9, 9]));
        let mut editor = SceneEditor::new(
            RecordingInpainter::default(),
            scene,
            scene_mask(),
            small_settings(),
        );

        let mut reported = Vec::new();
        let written = editor
            .run(&Label::ACTIVE, 42, 3, dir.path(), |out| {
                reported.push((out.index, out.first, out.second))
            })
            .unwrap();

        assert_eq!(
            written,
            vec![
                dir.path().join("output_01.png"),
                dir.path().join("output_02.png"),
                dir.path().join("output_03.png"),
            ]
        );
        assert!(written.iter().all(|p| p.exists()));
        assert_eq!(editor.model().calls.len(), 6);

        let expected: Vec<_> = plan(&Label::ACTIVE, 42, 3)
            .unwrap()
            .into_iter()
            .map(|e| (e.index, e.first, e.second))
            .collect();
        assert_eq!(reported, expected);
    }

    #[test]
    fn failure_keeps_earlier_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let scene = RgbImage::from_pixel(4, 4, Rgb([9, 9, 9]));
        // Call 5 is stage A of the third output
        let model = FailingInpainter { fail_on: 5, seen: 0 };
        let mut editor = SceneEditor::new(model, scene, scene_mask(), small_settings());

        let err = editor
            .run(&Label::ACTIVE, 7, 4, dir.path(), |_| {})
            .unwrap_err();
        assert!(matches!(err, EditError::Inpaint(InpaintError::InvalidOutput(_))));
        assert!(dir.path().join("output_01.png").exists());
        assert!(dir.path().join("output_02.png").exists());
        assert!(!dir.path().join("output_03.png").exists());
    }
}
