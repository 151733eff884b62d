//! The render driver: validates the packed tables once, then maps the
//! pixel range over a rayon pool. Work items are share-nothing; each owns
//! exactly one film cell, so the parallel iteration needs no locking.

use std::ops::Range;

use kernels::{render_pixel, RenderMode};
use rayon::prelude::*;
use scene_tables::{SceneError, SceneTables};
use thiserror::Error;
use tracing::debug;

use crate::film::Film;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error(transparent)]
    Scene(#[from] SceneError),
    #[error("film is {film_width}x{film_height} but the camera renders {width}x{height}")]
    FilmMismatch {
        film_width: u32,
        film_height: u32,
        width: u32,
        height: u32,
    },
}

/// Render one pass over every pixel of the film. Deterministic for a fixed
/// (scene, mode, pass_index, clear flag) regardless of scheduling, because
/// every work item seeds its RNG from its own (global_id, pass_index).
pub fn render_pass(
    tables: &SceneTables,
    mode: RenderMode,
    pass_index: u32,
    film: &mut Film,
) -> Result<(), RenderError> {
    let pixel_count = film.cells.len() as u32;
    render_pass_range(tables, mode, pass_index, film, 0..pixel_count)
}

/// Render one pass over a sub-range of pixels; the host may shard a pass
/// over several calls (or machines) as it pleases.
pub fn render_pass_range(
    tables: &SceneTables,
    mode: RenderMode,
    pass_index: u32,
    film: &mut Film,
    pixels: Range<u32>,
) -> Result<(), RenderError> {
    tables.validate()?;
    let (width, height) = tables.resolution();
    if film.width() != width || film.height() != height {
        return Err(RenderError::FilmMismatch {
            film_width: film.width(),
            film_height: film.height(),
            width,
            height,
        });
    }

    let clear = film.clear_flag();
    debug!(
        pass_index,
        start = pixels.start,
        end = pixels.end,
        clear,
        "render pass"
    );

    let start = pixels.start as usize;
    let end = (pixels.end as usize).min(film.cells.len());
    film.cells[start..end]
        .par_iter_mut()
        .enumerate()
        .for_each(|(offset, cell)| {
            let global_id = (start + offset) as u32;
            if let Some(radiance) = render_pixel(tables, mode, global_id, pass_index) {
                cell.add(radiance, clear);
            }
        });

    // The clear flag is one-shot: it covers exactly the pass it was set for.
    film.set_clear_flag(false);
    Ok(())
}
