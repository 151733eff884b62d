//! Primary ray generation from the packed camera array: a thin-lens model
//! with optional depth of field, or a fisheye projection. Field-of-view
//! angles are radians.

use glam::Vec3;
use scene_tables::{
    CAMERA_APERTURE_RADIUS, CAMERA_EYE, CAMERA_FOCAL_DISTANCE, CAMERA_FOV_X, CAMERA_FOV_Y,
    CAMERA_LENS, CAMERA_RESOLUTION_X, CAMERA_RESOLUTION_Y, CAMERA_U, CAMERA_V, CAMERA_W,
    LENS_THIN,
};

use crate::rng::RngState;
use crate::sampling::{sample_triangle_filter, uniform_sample_disk};
use crate::trace::Ray;

fn read_vec3(camera: &[f32], offset: usize) -> Vec3 {
    Vec3::new(camera[offset], camera[offset + 1], camera[offset + 2])
}

/// Generate the primary ray for a pixel, jittered by a triangle
/// reconstruction filter. Returns `None` when the fisheye mapping rejects
/// the sample (outside the unit disk); the film must stay untouched then.
pub fn generate_primary_ray(
    camera: &[f32],
    pixel_x: u32,
    pixel_y: u32,
    rng: &mut RngState,
) -> Option<Ray> {
    let resolution_x = camera[CAMERA_RESOLUTION_X];
    let resolution_y = camera[CAMERA_RESOLUTION_Y];
    let u = read_vec3(camera, CAMERA_U);
    let v = read_vec3(camera, CAMERA_V);
    let w = read_vec3(camera, CAMERA_W);
    let eye = read_vec3(camera, CAMERA_EYE);

    let filter = rng.gen_r2();
    let sample_x = pixel_x as f32 + 0.5 + sample_triangle_filter(filter.x);
    let sample_y = pixel_y as f32 + 0.5 + sample_triangle_filter(filter.y);

    // NDC in [-1, 1], +y up.
    let ndc_x = sample_x / resolution_x * 2.0 - 1.0;
    let ndc_y = 1.0 - sample_y / resolution_y * 2.0;

    if camera[CAMERA_LENS] == LENS_THIN {
        let tan_x = (camera[CAMERA_FOV_X] * 0.5).tan();
        let tan_y = (camera[CAMERA_FOV_Y] * 0.5).tan();
        let direction = (u * (ndc_x * tan_x) + v * (ndc_y * tan_y) + w).normalize();

        let aperture = camera[CAMERA_APERTURE_RADIUS];
        if aperture > 0.0 {
            let focal_distance = camera[CAMERA_FOCAL_DISTANCE];
            let focus_t = focal_distance / direction.dot(w);
            let focus_point = eye + direction * focus_t;
            let lens = rng.gen_r2();
            let disk = uniform_sample_disk(lens.x, lens.y) * aperture;
            let origin = eye + u * disk.x + v * disk.y;
            Some(Ray::new(origin, (focus_point - origin).normalize()))
        } else {
            Some(Ray::new(eye, direction))
        }
    } else {
        // Fisheye: the square sample maps onto the unit disk; the radius
        // becomes the angle away from the view axis.
        let radius_squared = ndc_x * ndc_x + ndc_y * ndc_y;
        if radius_squared > 1.0 {
            return None;
        }
        let radius = radius_squared.sqrt();
        let theta = radius * camera[CAMERA_FOV_X] * 0.5;
        let phi = ndc_y.atan2(ndc_x);
        let (sin_theta, cos_theta) = theta.sin_cos();
        let direction =
            (w * cos_theta + (u * phi.cos() + v * phi.sin()) * sin_theta).normalize();
        Some(Ray::new(eye, direction))
    }
}
