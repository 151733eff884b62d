//! The light evaluator: per-kind sampling of incoming radiance, emitted
//! radiance for rays that hit emissive surfaces or leave the scene, pdfs
//! for MIS, and the one-light direct-lighting estimator.

use core::f32::consts::PI;

use glam::{Vec2, Vec3};
use scene_tables::SceneTables;

use crate::bsdf::Bsdf;
use crate::intersect::{triangle_hit, Intersection};
use crate::rng::RngState;
use crate::sampling::{
    mask_nan, power_heuristic, uniform_sample_hemisphere, OrthonormalBasis, EPS, RAY_OFFSET,
    UNIFORM_SPHERE_PDF,
};
use crate::texture::ldr_image_lookup;
use crate::trace::{trace_any, Ray};

/// Stand-in distance to "infinitely far" light points.
const FAR_LIGHT_DISTANCE: f32 = 1.0e4;

#[derive(Clone, Copy, Debug)]
pub struct LightSample {
    /// Unit direction from the reference point toward the light.
    pub incoming: Vec3,
    /// The sampled point on the light.
    pub point: Vec3,
    pub radiance: Vec3,
    /// pdf with respect to solid angle at the reference point.
    pub pdf: f32,
}

/// Delta lights (point, spot, directional) cannot be hit by BSDF samples,
/// so the MIS weight for them degenerates to plain estimation.
pub fn light_is_delta(kind: i32) -> bool {
    matches!(
        kind,
        scene_tables::LIGHT_POINT | scene_tables::LIGHT_SPOT | scene_tables::LIGHT_DIRECTIONAL
    )
}

fn read_vec3(table: &[f32], offset: usize) -> Vec3 {
    Vec3::new(table[offset], table[offset + 1], table[offset + 2])
}

/// Equirectangular direction-to-UV used by the LDR environment light.
fn equirectangular_uv(direction: Vec3) -> Vec2 {
    Vec2::new(
        0.5 + direction.z.atan2(direction.x) / (2.0 * PI),
        0.5 - direction.y.clamp(-1.0, 1.0).asin() / PI,
    )
}

// --- Per-kind sampling ----------------------------------------------------

pub fn sample_light_radiance_incoming(
    tables: &SceneTables,
    kind: i32,
    offset: i32,
    reference: Vec3,
    rng: &mut RngState,
) -> Option<LightSample> {
    let table = tables.light_table(kind);
    let offset = offset as usize;
    match kind {
        scene_tables::LIGHT_POINT => {
            let position = read_vec3(table, offset);
            let intensity = read_vec3(table, offset + 3);
            let to_light = position - reference;
            let distance_squared = to_light.length_squared();
            if distance_squared <= EPS {
                return None;
            }
            Some(LightSample {
                incoming: to_light / distance_squared.sqrt(),
                point: position,
                radiance: intensity / distance_squared,
                pdf: 1.0,
            })
        }
        scene_tables::LIGHT_SPOT => {
            let position = read_vec3(table, offset);
            let direction = read_vec3(table, offset + 3);
            let intensity = read_vec3(table, offset + 6);
            let cos_inner = table[offset + 9];
            let cos_outer = table[offset + 10];
            let to_light = position - reference;
            let distance_squared = to_light.length_squared();
            if distance_squared <= EPS {
                return None;
            }
            let incoming = to_light / distance_squared.sqrt();
            let cos_spot = direction.dot(-incoming);
            let falloff = if cos_spot < cos_outer {
                0.0
            } else if cos_spot > cos_inner {
                1.0
            } else {
                let delta = (cos_spot - cos_outer) / (cos_inner - cos_outer);
                (delta * delta) * (delta * delta)
            };
            Some(LightSample {
                incoming,
                point: position,
                radiance: intensity * falloff / distance_squared,
                pdf: 1.0,
            })
        }
        scene_tables::LIGHT_DIRECTIONAL => {
            let direction = read_vec3(table, offset);
            let radiance = read_vec3(table, offset + 3);
            let incoming = -direction.normalize();
            Some(LightSample {
                incoming,
                point: reference + incoming * FAR_LIGHT_DISTANCE,
                radiance,
                pdf: 1.0,
            })
        }
        scene_tables::LIGHT_DIFFUSE_AREA => {
            let radiance = read_vec3(table, offset);
            let a = read_vec3(table, offset + 3);
            let b = read_vec3(table, offset + 6);
            let c = read_vec3(table, offset + 9);
            let area = table[offset + 12];
            let two_sided = table[offset + 13] != 0.0;

            // Uniform point on the triangle.
            let sample = rng.gen_r2();
            let root = sample.x.sqrt();
            let point = a * (1.0 - root) + b * (root * (1.0 - sample.y)) + c * (root * sample.y);

            let to_light = point - reference;
            let distance_squared = to_light.length_squared();
            if distance_squared <= EPS || area <= 0.0 {
                return None;
            }
            let distance = distance_squared.sqrt();
            let incoming = to_light / distance;
            let normal = (b - a).cross(c - a).normalize();
            let cos_light = normal.dot(-incoming);
            let facing = if two_sided { cos_light.abs() } else { cos_light };
            if facing <= 0.0 {
                return None;
            }
            Some(LightSample {
                incoming,
                point,
                radiance,
                pdf: distance_squared / (area * facing),
            })
        }
        scene_tables::LIGHT_LDR_IMAGE => {
            let sample = rng.gen_r2();
            let incoming = crate::sampling::uniform_sample_sphere(sample.x, sample.y);
            Some(LightSample {
                incoming,
                point: reference + incoming * FAR_LIGHT_DISTANCE,
                radiance: ldr_image_lookup(table, offset, equirectangular_uv(incoming)),
                pdf: UNIFORM_SPHERE_PDF,
            })
        }
        scene_tables::LIGHT_PEREZ => {
            let sample = rng.gen_r2();
            let local = uniform_sample_hemisphere(sample.x, sample.y);
            let incoming = OrthonormalBasis::from_w(Vec3::Y).to_world(local);
            Some(LightSample {
                incoming,
                point: reference + incoming * FAR_LIGHT_DISTANCE,
                radiance: perez_radiance(table, offset, incoming),
                pdf: 1.0 / (2.0 * PI),
            })
        }
        _ => None,
    }
}

/// pdf (solid angle) of sampling `incoming` from the reference point with
/// the light's own strategy; 0 for delta lights and misses.
pub fn light_pdf_incoming(
    tables: &SceneTables,
    kind: i32,
    offset: i32,
    reference: Vec3,
    incoming: Vec3,
) -> f32 {
    let table = tables.light_table(kind);
    let offset = offset as usize;
    match kind {
        scene_tables::LIGHT_DIFFUSE_AREA => {
            let a = read_vec3(table, offset + 3);
            let b = read_vec3(table, offset + 6);
            let c = read_vec3(table, offset + 9);
            let area = table[offset + 12];
            let two_sided = table[offset + 13] != 0.0;
            match triangle_hit(a, b, c, reference, incoming, EPS, f32::MAX) {
                Some((t, _, _)) => {
                    let normal = (b - a).cross(c - a).normalize();
                    let cos_light = normal.dot(-incoming);
                    let facing = if two_sided { cos_light.abs() } else { cos_light };
                    if facing <= 0.0 || area <= 0.0 {
                        0.0
                    } else {
                        t * t / (area * facing)
                    }
                }
                None => 0.0,
            }
        }
        scene_tables::LIGHT_LDR_IMAGE => UNIFORM_SPHERE_PDF,
        scene_tables::LIGHT_PEREZ => {
            if incoming.y > 0.0 {
                1.0 / (2.0 * PI)
            } else {
                0.0
            }
        }
        _ => 0.0,
    }
}

/// Radiance a ray picks up when it leaves the scene and strikes this light
/// from the inside; non-zero only for environment lights.
pub fn light_radiance_emitted(tables: &SceneTables, kind: i32, offset: i32, direction: Vec3) -> Vec3 {
    let table = tables.light_table(kind);
    let offset = offset as usize;
    match kind {
        scene_tables::LIGHT_LDR_IMAGE => {
            ldr_image_lookup(table, offset, equirectangular_uv(direction))
        }
        scene_tables::LIGHT_PEREZ => perez_radiance(table, offset, direction),
        _ => Vec3::ZERO,
    }
}

/// Sum of all environment lights along an escaped ray.
pub fn environment_radiance(tables: &SceneTables, direction: Vec3) -> Vec3 {
    let mut radiance = Vec3::ZERO;
    for index in 0..tables.light_count() {
        let (kind, offset) = tables.light_at(index);
        radiance += light_radiance_emitted(tables, kind, offset, direction);
    }
    radiance
}

/// Emitted radiance of an area light hit by a ray, seen from `outgoing`
/// (the direction back along the ray).
pub fn area_light_emitted(
    tables: &SceneTables,
    kind: i32,
    offset: i32,
    surface_normal: Vec3,
    outgoing: Vec3,
) -> Vec3 {
    if kind != scene_tables::LIGHT_DIFFUSE_AREA {
        return Vec3::ZERO;
    }
    let table = tables.light_table(kind);
    let offset = offset as usize;
    let radiance = read_vec3(table, offset);
    let two_sided = table[offset + 13] != 0.0;
    if two_sided || surface_normal.dot(outgoing) > 0.0 {
        radiance
    } else {
        Vec3::ZERO
    }
}

// --- Direct lighting ------------------------------------------------------

fn unoccluded(tables: &SceneTables, from: Vec3, incoming: Vec3, distance: f32) -> bool {
    let ray = Ray::with_t_max(
        from + incoming * RAY_OFFSET,
        incoming,
        (distance - 2.0 * RAY_OFFSET).max(Ray::DEFAULT_T_MIN),
    );
    !trace_any(tables, &ray)
}

/// Uniformly pick one live light and estimate its direct contribution with
/// multiple importance sampling; the result is already scaled by the
/// inverse pick probability.
pub fn sample_one_light(
    tables: &SceneTables,
    hit: &Intersection,
    bsdf: &Bsdf,
    outgoing: Vec3,
    rng: &mut RngState,
) -> Vec3 {
    let count = tables.light_count();
    if count == 0 {
        return Vec3::ZERO;
    }
    let pick = ((rng.gen_r1() * count as f32) as usize).min(count - 1);
    let (kind, offset) = tables.light_at(pick);
    estimate_direct(tables, kind, offset, hit, bsdf, outgoing, rng) * count as f32
}

fn estimate_direct(
    tables: &SceneTables,
    kind: i32,
    offset: i32,
    hit: &Intersection,
    bsdf: &Bsdf,
    outgoing: Vec3,
    rng: &mut RngState,
) -> Vec3 {
    let mut direct = Vec3::ZERO;
    let delta = light_is_delta(kind);

    // Strategy one: sample the light.
    if let Some(light_sample) = sample_light_radiance_incoming(tables, kind, offset, hit.point, rng)
    {
        if light_sample.pdf > 0.0 && light_sample.radiance != Vec3::ZERO {
            let f = bsdf.evaluate(outgoing, light_sample.incoming)
                * hit.shading.w.dot(light_sample.incoming).abs();
            if f != Vec3::ZERO {
                let distance = hit.point.distance(light_sample.point);
                if unoccluded(tables, hit.point, light_sample.incoming, distance) {
                    if delta {
                        direct += f * light_sample.radiance / light_sample.pdf;
                    } else {
                        let bsdf_pdf = bsdf.pdf(outgoing, light_sample.incoming);
                        let weight = power_heuristic(light_sample.pdf, bsdf_pdf);
                        direct += f * light_sample.radiance * weight / light_sample.pdf;
                    }
                }
            }
        }
    }

    // Strategy two: sample the BSDF toward non-delta lights.
    if !delta {
        if let Some(bsdf_sample) = bsdf.sample(outgoing, rng) {
            if !bsdf_sample.specular && bsdf_sample.pdf > 0.0 {
                let light_pdf =
                    light_pdf_incoming(tables, kind, offset, hit.point, bsdf_sample.incoming);
                if light_pdf > 0.0 {
                    let radiance = radiance_along(tables, kind, offset, hit, &bsdf_sample.incoming);
                    if radiance != Vec3::ZERO {
                        let weight = power_heuristic(bsdf_sample.pdf, light_pdf);
                        let cos_theta = hit.shading.w.dot(bsdf_sample.incoming).abs();
                        direct += bsdf_sample.result * cos_theta * radiance * weight
                            / bsdf_sample.pdf;
                    }
                }
            }
        }
    }

    mask_nan(direct)
}

/// Radiance reaching the hit point from this specific light along a BSDF
/// sampled direction, honoring occlusion.
fn radiance_along(
    tables: &SceneTables,
    kind: i32,
    offset: i32,
    hit: &Intersection,
    incoming: &Vec3,
) -> Vec3 {
    let table = tables.light_table(kind);
    let offset_usize = offset as usize;
    match kind {
        scene_tables::LIGHT_DIFFUSE_AREA => {
            let a = read_vec3(table, offset_usize + 3);
            let b = read_vec3(table, offset_usize + 6);
            let c = read_vec3(table, offset_usize + 9);
            match triangle_hit(a, b, c, hit.point, *incoming, EPS, f32::MAX) {
                Some((t, _, _)) => {
                    if unoccluded(tables, hit.point, *incoming, t) {
                        let normal = (b - a).cross(c - a).normalize();
                        area_light_emitted(tables, kind, offset, normal, -*incoming)
                    } else {
                        Vec3::ZERO
                    }
                }
                None => Vec3::ZERO,
            }
        }
        scene_tables::LIGHT_LDR_IMAGE | scene_tables::LIGHT_PEREZ => {
            let ray = Ray::new(hit.point + *incoming * RAY_OFFSET, *incoming);
            if trace_any(tables, &ray) {
                Vec3::ZERO
            } else {
                light_radiance_emitted(tables, kind, offset, *incoming)
            }
        }
        _ => Vec3::ZERO,
    }
}

// --- Perez sky ------------------------------------------------------------

// F(theta, gamma) = (1 + A e^(B/cos theta)) (1 + C e^(D gamma) + E cos^2 gamma)
fn perez_function(coefficients: &[f32], cos_theta: f32, gamma: f32, cos_gamma: f32) -> f32 {
    let a = coefficients[0];
    let b = coefficients[1];
    let c = coefficients[2];
    let d = coefficients[3];
    let e = coefficients[4];
    (1.0 + a * (b / cos_theta.max(0.01)).exp()) * (1.0 + c * (d * gamma).exp() + e * cos_gamma * cos_gamma)
}

fn xyz_from_yxy(big_y: f32, x: f32, y: f32) -> Vec3 {
    if y <= 0.0 {
        return Vec3::ZERO;
    }
    let ratio = big_y / y;
    Vec3::new(x * ratio, big_y, (1.0 - x - y) * ratio)
}

fn rgb_from_xyz(xyz: Vec3) -> Vec3 {
    Vec3::new(
        3.2406 * xyz.x - 1.5372 * xyz.y - 0.4986 * xyz.z,
        -0.9689 * xyz.x + 1.8758 * xyz.y + 0.0415 * xyz.z,
        0.0557 * xyz.x - 0.2040 * xyz.y + 1.0570 * xyz.z,
    )
    .max(Vec3::ZERO)
}

/// Evaluate the Perez sky model for a world direction (+Y is up). The
/// zenith values and the three coefficient sets are precomputed by the
/// scene compiler from turbidity.
pub fn perez_radiance(table: &[f32], offset: usize, direction: Vec3) -> Vec3 {
    let direction = direction.normalize();
    if direction.y <= 0.0 {
        return Vec3::ZERO;
    }
    let sun = read_vec3(table, offset).normalize();
    let theta_sun = table[offset + 3];
    let zenith = read_vec3(table, offset + 4);
    let coefficients_y = &table[offset + 7..offset + 12];
    let coefficients_x = &table[offset + 12..offset + 17];
    let coefficients_yy = &table[offset + 17..offset + 22];
    let scale = table[offset + 22];

    let cos_theta = direction.y.max(0.01);
    let cos_gamma = direction.dot(sun).clamp(-1.0, 1.0);
    let gamma = cos_gamma.acos();
    let cos_theta_sun = theta_sun.cos();

    let relative = |coefficients: &[f32]| -> f32 {
        perez_function(coefficients, cos_theta, gamma, cos_gamma)
            / perez_function(coefficients, 1.0, theta_sun, cos_theta_sun)
    };

    let big_y = zenith.x * relative(coefficients_y);
    let x = zenith.y * relative(coefficients_x);
    let y = zenith.z * relative(coefficients_yy);
    mask_nan(rgb_from_xyz(xyz_from_yxy(big_y, x, y)) * scale)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use scene_tables::*;

    fn empty_scene_with_light(kind: i32, payload: &[f32]) -> SceneTables {
        let mut tables = SceneTables::default();
        match kind {
            LIGHT_POINT => tables.lights_point.extend_from_slice(payload),
            LIGHT_SPOT => tables.lights_spot.extend_from_slice(payload),
            LIGHT_DIRECTIONAL => tables.lights_directional.extend_from_slice(payload),
            LIGHT_DIFFUSE_AREA => tables.lights_diffuse_area.extend_from_slice(payload),
            _ => unreachable!(),
        }
        tables.light_enumeration.extend_from_slice(&[kind, 0]);
        tables
    }

    #[test]
    fn point_light_follows_inverse_square() {
        let tables =
            empty_scene_with_light(LIGHT_POINT, &[0.0, 2.0, 0.0, 8.0, 8.0, 8.0]);
        let mut rng = RngState::new(0, 0);
        let sample =
            sample_light_radiance_incoming(&tables, LIGHT_POINT, 0, Vec3::ZERO, &mut rng).unwrap();
        assert_relative_eq!(sample.incoming.y, 1.0, epsilon = 1e-5);
        assert_relative_eq!(sample.radiance.x, 2.0, epsilon = 1e-5);
        assert_relative_eq!(sample.pdf, 1.0);
        assert!(light_is_delta(LIGHT_POINT));
    }

    #[test]
    fn spot_light_cuts_off_outside_cone() {
        // aimed straight down, tight cone
        let payload = [
            0.0, 5.0, 0.0, // position
            0.0, -1.0, 0.0, // direction
            10.0, 10.0, 10.0, // intensity
            0.99, 0.95, // cos inner, cos outer
        ];
        let tables = empty_scene_with_light(LIGHT_SPOT, &payload);
        let mut rng = RngState::new(0, 0);
        let inside =
            sample_light_radiance_incoming(&tables, LIGHT_SPOT, 0, Vec3::ZERO, &mut rng).unwrap();
        assert!(inside.radiance.x > 0.0);
        let outside = sample_light_radiance_incoming(
            &tables,
            LIGHT_SPOT,
            0,
            Vec3::new(5.0, 0.0, 0.0),
            &mut rng,
        )
        .unwrap();
        assert_eq!(outside.radiance, Vec3::ZERO);
    }

    // winding picked so the face normal points down, toward the origin
    fn downward_area_light() -> SceneTables {
        let payload = [
            5.0, 5.0, 5.0, // radiance
            0.0, 3.0, 0.0, //
            1.0, 3.0, 0.0, //
            0.0, 3.0, 1.0, //
            0.5, 0.0, // area, one-sided
        ];
        empty_scene_with_light(LIGHT_DIFFUSE_AREA, &payload)
    }

    #[test]
    fn area_light_pdf_matches_solid_angle_conversion() {
        let tables = downward_area_light();
        let reference = Vec3::new(0.25, 0.0, 0.25);
        let pdf = light_pdf_incoming(&tables, LIGHT_DIFFUSE_AREA, 0, reference, Vec3::Y);
        // hit at distance 3, normal facing straight back: t^2 / (area * 1)
        assert_relative_eq!(pdf, 9.0 / 0.5, epsilon = 1e-3);
    }

    #[test]
    fn area_light_back_face_is_dark_when_one_sided() {
        let tables = downward_area_light();
        let normal = Vec3::new(0.0, -1.0, 0.0);
        // seen from below (ray up, outgoing back down): emits
        let front = area_light_emitted(&tables, LIGHT_DIFFUSE_AREA, 0, normal, -Vec3::Y);
        assert_relative_eq!(front.x, 5.0);
        // seen from above: dark
        let back = area_light_emitted(&tables, LIGHT_DIFFUSE_AREA, 0, normal, Vec3::Y);
        assert_eq!(back, Vec3::ZERO);
    }

    #[test]
    fn environment_sums_only_infinite_lights() {
        let mut tables = SceneTables::default();
        tables
            .lights_directional
            .extend_from_slice(&[0.0, -1.0, 0.0, 3.0, 3.0, 3.0]);
        tables.light_enumeration.extend_from_slice(&[LIGHT_DIRECTIONAL, 0]);
        assert_eq!(environment_radiance(&tables, Vec3::Y), Vec3::ZERO);
    }

    #[test]
    fn perez_sky_is_bright_near_sun_and_dark_below_horizon() {
        let mut table = Vec::new();
        let sun = Vec3::new(0.3, 0.8, 0.1).normalize();
        table.extend_from_slice(&[sun.x, sun.y, sun.z, sun.y.acos()]);
        table.extend_from_slice(&[8.0, 0.33, 0.33]); // zenith Y, x, y
        table.extend_from_slice(&[-1.0, -0.3, 10.0, -3.0, 0.45]); // Y
        table.extend_from_slice(&[-0.01, -0.25, 0.01, -0.8, 0.04]); // x
        table.extend_from_slice(&[-0.01, -0.25, 0.01, -0.8, 0.04]); // y
        table.push(1.0);

        let near_sun = perez_radiance(&table, 0, sun);
        let away = perez_radiance(&table, 0, Vec3::new(-0.5, 0.4, -0.5).normalize());
        assert!(near_sun.length() > away.length());
        assert_eq!(
            perez_radiance(&table, 0, Vec3::new(0.0, -1.0, 0.0)),
            Vec3::ZERO
        );
    }
}
