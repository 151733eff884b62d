//! The film and the image pipeline. The film keeps a numerically stable
//! per-pixel moving mean of radiance; the image stage copies the means,
//! tone-maps, gamma-corrects and packs 8-bit RGBA.

use glam::Vec3;

/// One film cell: the running mean and how many samples went into it.
#[derive(Clone, Copy, Debug, Default)]
pub struct FilmCell {
    pub color: Vec3,
    pub sample_count: u32,
}

impl FilmCell {
    /// Moving-mean update. With `clear` set the cell restarts at exactly
    /// the added color with a count of one.
    pub fn add(&mut self, color: Vec3, clear: bool) {
        if clear || self.sample_count == 0 {
            self.color = color;
            self.sample_count = 1;
        } else {
            let next = self.sample_count + 1;
            self.color += (color - self.color) / next as f32;
            self.sample_count = next;
        }
    }
}

#[derive(Clone, Debug)]
pub struct Film {
    width: u32,
    height: u32,
    pub(crate) cells: Vec<FilmCell>,
    clear_flag: bool,
}

impl Film {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            cells: vec![FilmCell::default(); (width * height) as usize],
            clear_flag: false,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Host-side only, between passes: the next add into every cell
    /// overwrites instead of accumulating.
    pub fn set_clear_flag(&mut self, clear: bool) {
        self.clear_flag = clear;
    }

    pub fn clear_flag(&self) -> bool {
        self.clear_flag
    }

    pub fn add_color(&mut self, index: usize, color: Vec3) {
        let clear = self.clear_flag;
        self.cells[index].add(color, clear);
    }

    pub fn cell(&self, x: u32, y: u32) -> &FilmCell {
        &self.cells[(y * self.width + x) as usize]
    }

    /// The RGB f32 film contents, flat row-major, for progressive display
    /// or HDR export.
    pub fn to_rgb_f32(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.cells.len() * 3);
        for cell in &self.cells {
            out.extend_from_slice(&[cell.color.x, cell.color.y, cell.color.z]);
        }
        out
    }
}

/// Tone operator selector.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ToneMapper {
    #[default]
    None,
    Reinhard,
    ReinhardModifiedV1,
    ReinhardModifiedV2,
    Unreal3,
    FilmicAcesModifiedV1,
}

fn tone_map_component(operator: ToneMapper, exposure: f32, component: f32) -> f32 {
    match operator {
        ToneMapper::None => component,
        ToneMapper::Reinhard => {
            let c = component * exposure;
            c / (1.0 + c)
        }
        ToneMapper::ReinhardModifiedV1 => {
            // white point fixed at 4
            const WHITE_SQUARED: f32 = 16.0;
            let c = component * exposure;
            c * (1.0 + c / WHITE_SQUARED) / (1.0 + c)
        }
        ToneMapper::ReinhardModifiedV2 => 1.0 - (-component * exposure).exp(),
        ToneMapper::Unreal3 => {
            let c = component * exposure;
            c / (c + 0.155) * 1.019
        }
        ToneMapper::FilmicAcesModifiedV1 => {
            let c = component * exposure;
            let mapped = (c * (2.51 * c + 0.03)) / (c * (2.43 * c + 0.59) + 0.14);
            mapped.clamp(0.0, 1.0)
        }
    }
}

/// sRGB transfer curve with break point 0.00304.
pub fn srgb_encode(component: f32) -> f32 {
    if component <= 0.00304 {
        component * 12.92
    } else {
        1.055 * component.powf(1.0 / 2.4) - 0.055
    }
}

pub fn srgb_decode(component: f32) -> f32 {
    if component <= 0.00304 * 12.92 {
        component / 12.92
    } else {
        ((component + 0.055) / 1.055).powf(2.4)
    }
}

/// The staging buffer the tone mappers operate on.
#[derive(Clone, Debug)]
pub struct Image {
    width: u32,
    height: u32,
    pixels: Vec<Vec3>,
}

impl Image {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![Vec3::ZERO; (width * height) as usize],
        }
    }

    /// Copy the film means into the staging buffer.
    pub fn begin(&mut self, film: &Film) {
        debug_assert_eq!(self.pixels.len(), film.cells.len());
        for (pixel, cell) in self.pixels.iter_mut().zip(film.cells.iter()) {
            *pixel = cell.color;
        }
    }

    pub fn tone_map(&mut self, operator: ToneMapper, exposure: f32) {
        for pixel in &mut self.pixels {
            *pixel = Vec3::new(
                tone_map_component(operator, exposure, pixel.x),
                tone_map_component(operator, exposure, pixel.y),
                tone_map_component(operator, exposure, pixel.z),
            );
        }
    }

    pub fn redo_gamma_correction(&mut self) {
        for pixel in &mut self.pixels {
            *pixel = Vec3::new(
                srgb_encode(pixel.x),
                srgb_encode(pixel.y),
                srgb_encode(pixel.z),
            );
        }
    }

    pub fn undo_gamma_correction(&mut self) {
        for pixel in &mut self.pixels {
            *pixel = Vec3::new(
                srgb_decode(pixel.x),
                srgb_decode(pixel.y),
                srgb_decode(pixel.z),
            );
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> Vec3 {
        self.pixels[(y * self.width + x) as usize]
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Clamp, scale to bytes and pack RGBA with opaque alpha.
    pub fn end(&self) -> Vec<u8> {
        let rgba: Vec<[u8; 4]> = self
            .pixels
            .iter()
            .map(|pixel| {
                let clamped = pixel.clamp(Vec3::ZERO, Vec3::ONE) * 255.0;
                [
                    clamped.x.round() as u8,
                    clamped.y.round() as u8,
                    clamped.z.round() as u8,
                    255,
                ]
            })
            .collect();
        bytemuck::cast_vec(rgba)
    }
}
