pub mod diffusion;
pub mod editing;
pub mod prompts;
pub mod rasterize;
