//! The per-pixel render kernel. A work item owns one pixel: it seeds its
//! RNG from (global_id, pass_index), generates a camera ray and runs the
//! selected integrator against the read-only scene tables. Nothing in here
//! allocates, errors or touches another pixel's state.

use glam::Vec3;
use scene_tables::{
    SceneTables, LIGHT_NONE, PRIMITIVE_AREA_LIGHT_KIND, PRIMITIVE_AREA_LIGHT_OFFSET,
    PRIMITIVE_MATERIAL_KIND, PRIMITIVE_MATERIAL_OFFSET,
};

pub mod bsdf;
pub mod camera;
pub mod intersect;
pub mod light;
pub mod noise;
pub mod rng;
pub mod sampling;
pub mod solve;
pub mod texture;
pub mod trace;

use bsdf::evaluate_material;
use light::{area_light_emitted, environment_radiance, sample_one_light};
use rng::RngState;
use sampling::{cosine_sample_hemisphere, mask_nan, RAY_OFFSET};
use trace::{trace_any, trace_closest, Ray};

/// The host-selected kernel body.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RenderMode {
    AmbientOcclusion {
        maximum_distance: f32,
        samples: u32,
    },
    DepthCamera,
    PathTracing {
        maximum_bounces: u32,
        minimum_bounces: u32,
    },
    RayCasting,
    RayTracing {
        maximum_depth: u32,
    },
}

impl Default for RenderMode {
    fn default() -> Self {
        RenderMode::PathTracing {
            maximum_bounces: 20,
            minimum_bounces: 5,
        }
    }
}

/// Run one sample for one pixel. `None` means the camera rejected the
/// sample (fisheye outside the unit disk) and the film must not be touched.
pub fn render_pixel(
    tables: &SceneTables,
    mode: RenderMode,
    global_id: u32,
    pass_index: u32,
) -> Option<Vec3> {
    let mut rng = RngState::new(global_id, pass_index);
    let (resolution_x, _) = tables.resolution();
    if resolution_x == 0 {
        return None;
    }
    let pixel_x = global_id % resolution_x;
    let pixel_y = global_id / resolution_x;
    let ray = camera::generate_primary_ray(&tables.camera, pixel_x, pixel_y, &mut rng)?;

    let radiance = match mode {
        RenderMode::PathTracing {
            maximum_bounces,
            minimum_bounces,
        } => path_trace(tables, ray, &mut rng, maximum_bounces, minimum_bounces),
        RenderMode::AmbientOcclusion {
            maximum_distance,
            samples,
        } => ambient_occlusion(tables, ray, &mut rng, maximum_distance, samples),
        RenderMode::DepthCamera => depth_camera(tables, ray),
        RenderMode::RayCasting => ray_casting(tables, ray),
        RenderMode::RayTracing { maximum_depth } => {
            ray_trace(tables, ray, &mut rng, maximum_depth)
        }
    };
    Some(mask_nan(radiance))
}

/// Emitted radiance at a hit: the primitive's area light when it has one,
/// the material's emission texture otherwise.
fn emitted_at_hit(
    tables: &SceneTables,
    hit: &intersect::Intersection,
    material_emission: Vec3,
    outgoing: Vec3,
) -> Vec3 {
    let row = tables.primitive(hit.primitive_index as usize);
    let area_light_kind = row[PRIMITIVE_AREA_LIGHT_KIND];
    if area_light_kind != LIGHT_NONE {
        area_light_emitted(
            tables,
            area_light_kind,
            row[PRIMITIVE_AREA_LIGHT_OFFSET],
            hit.geometric.w,
            outgoing,
        )
    } else {
        material_emission
    }
}

fn path_trace(
    tables: &SceneTables,
    primary: Ray,
    rng: &mut RngState,
    maximum_bounces: u32,
    minimum_bounces: u32,
) -> Vec3 {
    let mut radiance = Vec3::ZERO;
    let mut throughput = Vec3::ONE;
    let mut eta_scale = 1.0f32;
    let mut specular_bounce = false;
    let mut ray = primary;

    let mut bounce = 0;
    while bounce < maximum_bounces {
        let Some(hit) = trace_closest(tables, &ray) else {
            if bounce == 0 || specular_bounce {
                radiance += mask_nan(throughput * environment_radiance(tables, ray.direction));
            }
            break;
        };

        let row = tables.primitive(hit.primitive_index as usize);
        let surface = evaluate_material(
            tables,
            row[PRIMITIVE_MATERIAL_KIND],
            row[PRIMITIVE_MATERIAL_OFFSET],
            &hit,
        );
        let outgoing = -ray.direction;

        // Emission is only counted when light sampling could not have:
        // camera hits and hits arriving through a delta lobe.
        if bounce == 0 || specular_bounce {
            radiance += mask_nan(throughput * emitted_at_hit(tables, &hit, surface.emission, outgoing));
        }

        if surface.has_non_specular_lobe() {
            radiance +=
                mask_nan(throughput * sample_one_light(tables, &hit, &surface, outgoing, rng));
        }

        let Some(sample) = surface.sample(outgoing, rng) else {
            break;
        };
        if sample.pdf <= 0.0 || !sample.pdf.is_finite() {
            break;
        }

        let cos_theta = hit.shading.w.dot(sample.incoming).abs();
        throughput *= sample.result * cos_theta / sample.pdf;
        if !throughput.is_finite() {
            break;
        }
        if sample.transmission {
            eta_scale *= sample.eta_scale;
        }
        specular_bounce = sample.specular;

        if bounce >= minimum_bounces {
            let survival = (throughput * eta_scale).max_element();
            if survival < 1.0 {
                let termination = (1.0 - survival).max(0.05);
                if rng.gen_r1() < termination {
                    break;
                }
                throughput /= 1.0 - termination;
            }
        }

        ray = Ray::new(hit.point + sample.incoming * RAY_OFFSET, sample.incoming);
        bounce += 1;
    }
    radiance
}

fn ambient_occlusion(
    tables: &SceneTables,
    primary: Ray,
    rng: &mut RngState,
    maximum_distance: f32,
    samples: u32,
) -> Vec3 {
    let Some(hit) = trace_closest(tables, &primary) else {
        return Vec3::ZERO;
    };
    let samples = samples.max(1);
    let mut visible = 0.0f32;
    for _ in 0..samples {
        let uv = rng.gen_r2();
        let direction = hit.geometric.to_world(cosine_sample_hemisphere(uv.x, uv.y));
        let occlusion = Ray::with_t_max(
            hit.point + direction * RAY_OFFSET,
            direction,
            maximum_distance,
        );
        if !trace_any(tables, &occlusion) {
            visible += 1.0;
        }
    }
    Vec3::splat(visible / samples as f32)
}

fn depth_camera(tables: &SceneTables, primary: Ray) -> Vec3 {
    match trace_closest(tables, &primary) {
        Some(hit) => {
            let distance = hit.point.distance(primary.origin);
            Vec3::splat(distance / (1.0 + distance))
        }
        None => Vec3::ZERO,
    }
}

fn ray_casting(tables: &SceneTables, primary: Ray) -> Vec3 {
    match trace_closest(tables, &primary) {
        Some(hit) => {
            let row = tables.primitive(hit.primitive_index as usize);
            let surface = evaluate_material(
                tables,
                row[PRIMITIVE_MATERIAL_KIND],
                row[PRIMITIVE_MATERIAL_OFFSET],
                &hit,
            );
            surface.albedo() * hit.shading.w.dot(-primary.direction).abs()
        }
        None => Vec3::ZERO,
    }
}

/// Whitted-style tracing: direct lighting at every surface, indirect light
/// only through delta lobes. No roulette; terminates at diffuse surfaces.
fn ray_trace(
    tables: &SceneTables,
    primary: Ray,
    rng: &mut RngState,
    maximum_depth: u32,
) -> Vec3 {
    let mut radiance = Vec3::ZERO;
    let mut throughput = Vec3::ONE;
    let mut ray = primary;

    for _ in 0..maximum_depth.max(1) {
        let Some(hit) = trace_closest(tables, &ray) else {
            radiance += mask_nan(throughput * environment_radiance(tables, ray.direction));
            break;
        };

        let row = tables.primitive(hit.primitive_index as usize);
        let surface = evaluate_material(
            tables,
            row[PRIMITIVE_MATERIAL_KIND],
            row[PRIMITIVE_MATERIAL_OFFSET],
            &hit,
        );
        let outgoing = -ray.direction;
        radiance += mask_nan(throughput * emitted_at_hit(tables, &hit, surface.emission, outgoing));

        if surface.has_non_specular_lobe() {
            radiance +=
                mask_nan(throughput * sample_one_light(tables, &hit, &surface, outgoing, rng));
            break;
        }

        let Some(sample) = surface.sample(outgoing, rng) else {
            break;
        };
        if sample.pdf <= 0.0 || !sample.pdf.is_finite() {
            break;
        }
        let cos_theta = hit.shading.w.dot(sample.incoming).abs();
        throughput *= sample.result * cos_theta / sample.pdf;
        if !throughput.is_finite() {
            break;
        }
        ray = Ray::new(hit.point + sample.incoming * RAY_OFFSET, sample.incoming);
    }
    radiance
}
