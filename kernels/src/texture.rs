//! Texture evaluation at a shading point. Selector textures (checkerboard,
//! bullseye) pick one of their two children and loop; blend evaluates both
//! children. Total work is bounded by a hop budget even if the compiler
//! ever emitted a cyclic chain; running out yields black.

use glam::{Vec2, Vec3};
use scene_tables::{
    unpack_rgb, SceneTables, LDR_IMAGE_ANGLE, LDR_IMAGE_DATA_LENGTH, LDR_IMAGE_HEADER_LENGTH,
    LDR_IMAGE_RESOLUTION_X, LDR_IMAGE_RESOLUTION_Y, LDR_IMAGE_SCALE_U, LDR_IMAGE_SCALE_V,
};

use crate::noise::{perlin_turbulence, simplex_fbm};

const MAX_HOPS: u32 = 16;

/// Evaluate the texture chain rooted at `(kind, offset)` for a shading
/// point, its shading normal and its texture coordinates.
pub fn evaluate_texture(
    tables: &SceneTables,
    kind: i32,
    offset: i32,
    point: Vec3,
    normal: Vec3,
    uv: Vec2,
) -> Vec3 {
    evaluate_with_budget(tables, kind, offset, point, normal, uv, MAX_HOPS)
}

fn evaluate_with_budget(
    tables: &SceneTables,
    kind: i32,
    offset: i32,
    point: Vec3,
    normal: Vec3,
    uv: Vec2,
    mut budget: u32,
) -> Vec3 {
    let mut kind = kind;
    let mut offset = offset as usize;

    while budget > 0 {
        budget -= 1;
        match kind {
            scene_tables::TEXTURE_CONSTANT => {
                let table = &tables.textures_constant;
                return Vec3::new(table[offset], table[offset + 1], table[offset + 2]);
            }
            scene_tables::TEXTURE_CHECKERBOARD => {
                let table = &tables.textures_checkerboard;
                let angle = table[offset + 4];
                let scale_u = table[offset + 5];
                let scale_v = table[offset + 6];
                let (sin, cos) = angle.sin_cos();
                let u = (uv.x * cos - uv.y * sin) * scale_u;
                let v = (uv.x * sin + uv.y * cos) * scale_v;
                let even = (u.floor() + v.floor()) as i64 % 2 == 0;
                let child = if even { 0 } else { 2 };
                kind = table[offset + child] as i32;
                offset = table[offset + child + 1] as usize;
            }
            scene_tables::TEXTURE_BULLSEYE => {
                let table = &tables.textures_bullseye;
                let origin = Vec3::new(table[offset + 4], table[offset + 5], table[offset + 6]);
                let scale = table[offset + 7];
                let distance = (point - origin).length() * scale;
                let child = if distance.rem_euclid(2.0) < 1.0 { 0 } else { 2 };
                kind = table[offset + child] as i32;
                offset = table[offset + child + 1] as usize;
            }
            scene_tables::TEXTURE_BLEND => {
                let table = &tables.textures_blend;
                let color_a = evaluate_with_budget(
                    tables,
                    table[offset] as i32,
                    table[offset + 1] as i32,
                    point,
                    normal,
                    uv,
                    budget,
                );
                let color_b = evaluate_with_budget(
                    tables,
                    table[offset + 2] as i32,
                    table[offset + 3] as i32,
                    point,
                    normal,
                    uv,
                    budget,
                );
                let factor = Vec3::new(table[offset + 4], table[offset + 5], table[offset + 6]);
                return color_a * (Vec3::ONE - factor) + color_b * factor;
            }
            scene_tables::TEXTURE_MARBLE => {
                let table = &tables.textures_marble;
                let color_a = Vec3::new(table[offset], table[offset + 1], table[offset + 2]);
                let color_b = Vec3::new(table[offset + 3], table[offset + 4], table[offset + 5]);
                let color_c = Vec3::new(table[offset + 6], table[offset + 7], table[offset + 8]);
                let frequency = table[offset + 9];
                let scale = table[offset + 10];
                let stripes = table[offset + 11];
                let octaves = table[offset + 12] as i32;

                let turbulence = perlin_turbulence(point * frequency, octaves);
                let band = ((point.x + point.y + point.z) * frequency * stripes
                    + scale * turbulence)
                    .sin()
                    * 0.5
                    + 0.5;
                return if band < 0.5 {
                    color_a.lerp(color_b, band * 2.0)
                } else {
                    color_b.lerp(color_c, (band - 0.5) * 2.0)
                };
            }
            scene_tables::TEXTURE_SIMPLEX_FBM => {
                let table = &tables.textures_simplex_fbm;
                let color = Vec3::new(table[offset], table[offset + 1], table[offset + 2]);
                let frequency = table[offset + 3];
                let gain = table[offset + 4];
                let octaves = table[offset + 5] as i32;
                return color * simplex_fbm(point, frequency, gain, octaves);
            }
            scene_tables::TEXTURE_LDR_IMAGE => {
                return ldr_image_lookup(&tables.textures_ldr_image, offset, uv);
            }
            scene_tables::TEXTURE_SURFACE_NORMAL => {
                return (normal + Vec3::ONE) * 0.5;
            }
            scene_tables::TEXTURE_UV => {
                return Vec3::new(uv.x, uv.y, 0.0);
            }
            scene_tables::TEXTURE_FUNCTION => {
                let table = &tables.textures_function;
                return Vec3::new(table[offset], table[offset + 1], table[offset + 2]);
            }
            _ => return Vec3::ZERO,
        }
    }
    Vec3::ZERO
}

/// Bilinear lookup with periodic wrap into an inlined LDR image, after
/// rotating the UV by the stored angle and applying the stored scale. Also
/// used by the LDR environment light.
pub fn ldr_image_lookup(table: &[f32], offset: usize, uv: Vec2) -> Vec3 {
    let angle = table[offset + LDR_IMAGE_ANGLE];
    let scale_u = table[offset + LDR_IMAGE_SCALE_U];
    let scale_v = table[offset + LDR_IMAGE_SCALE_V];
    let resolution_x = table[offset + LDR_IMAGE_RESOLUTION_X] as i64;
    let resolution_y = table[offset + LDR_IMAGE_RESOLUTION_Y] as i64;
    let data_length = table[offset + LDR_IMAGE_DATA_LENGTH] as i64;
    if resolution_x <= 0 || resolution_y <= 0 || data_length < resolution_x * resolution_y {
        return Vec3::ZERO;
    }

    let (sin, cos) = angle.sin_cos();
    let u = (uv.x * cos - uv.y * sin) * scale_u * resolution_x as f32;
    let v = (uv.x * sin + uv.y * cos) * scale_v * resolution_y as f32;

    let x0 = u.floor();
    let y0 = v.floor();
    let fx = u - x0;
    let fy = v - y0;

    let fetch = |x: i64, y: i64| -> Vec3 {
        let x = x.rem_euclid(resolution_x);
        let y = y.rem_euclid(resolution_y);
        let pixel = table[offset + LDR_IMAGE_HEADER_LENGTH + (y * resolution_x + x) as usize];
        let (r, g, b) = unpack_rgb(pixel);
        Vec3::new(r, g, b)
    };

    let c00 = fetch(x0 as i64, y0 as i64);
    let c10 = fetch(x0 as i64 + 1, y0 as i64);
    let c01 = fetch(x0 as i64, y0 as i64 + 1);
    let c11 = fetch(x0 as i64 + 1, y0 as i64 + 1);
    c00.lerp(c10, fx).lerp(c01.lerp(c11, fx), fy)
}
