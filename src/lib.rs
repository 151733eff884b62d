//! candela: a data-parallel Monte-Carlo path-tracing core.
//!
//! The crate is a library with three layers: `scene_tables` holds the
//! packed numeric arrays a pass reads, `kernels` is the per-pixel render
//! kernel, and this crate drives passes over a rayon pool, keeps the
//! moving-mean film and runs the image pipeline. Scene authoring stays on
//! the host side of the fence: `compile::SceneBuilder` packs tables, the
//! kernel only ever indexes them.

pub mod compile;
pub mod film;
pub mod renderer;

pub use film::{Film, FilmCell, Image, ToneMapper};
pub use kernels::RenderMode;
pub use renderer::{render_pass, render_pass_range, RenderError};
pub use scene_tables::{SceneError, SceneTables};
