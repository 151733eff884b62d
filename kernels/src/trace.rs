//! Primitive traversal: walk the whole primitive table, gate by world-space
//! bounding volume, run the object-space shape test through the primitive's
//! transform pair, and keep the nearest hit.

use glam::{Mat4, Vec3};
use scene_tables::{
    SceneTables, PRIMITIVE_BV_KIND, PRIMITIVE_BV_OFFSET, PRIMITIVE_SHAPE_KIND,
    PRIMITIVE_SHAPE_OFFSET,
};

use crate::intersect::{
    bounding_volume_gate, shape_intersection_t, shape_intersects, shape_intersection_compute,
    Intersection,
};
use crate::sampling::OrthonormalBasis;

#[derive(Clone, Copy, Debug)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
    pub t_min: f32,
    pub t_max: f32,
}

impl Ray {
    pub const DEFAULT_T_MIN: f32 = 0.001;

    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self {
            origin,
            direction,
            t_min: Self::DEFAULT_T_MIN,
            t_max: f32::MAX,
        }
    }

    pub fn with_t_max(origin: Vec3, direction: Vec3, t_max: f32) -> Self {
        Self {
            origin,
            direction,
            t_min: Self::DEFAULT_T_MIN,
            t_max,
        }
    }

    pub fn point_at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }
}

/// A world-space ray expressed in a primitive's object space. The t
/// interval is rescaled through reference points so the object-space
/// interval matches the world-space one under non-uniform scale.
struct ObjectRay {
    origin: Vec3,
    direction: Vec3,
    t_min: f32,
    t_max: f32,
}

fn ray_to_object(ray: &Ray, world_to_object: &Mat4) -> ObjectRay {
    let origin = world_to_object.transform_point3(ray.origin);
    let direction = world_to_object.transform_vector3(ray.direction).normalize();
    let t_min = origin.distance(world_to_object.transform_point3(ray.point_at(ray.t_min)));
    let t_max = if ray.t_max == f32::MAX {
        f32::MAX
    } else {
        origin.distance(world_to_object.transform_point3(ray.point_at(ray.t_max)))
    };
    ObjectRay {
        origin,
        direction,
        t_min,
        t_max,
    }
}

/// Transform the object-space intersection frame to world space: the point
/// through the matrix, every basis direction through the inverse transpose,
/// then re-normalize.
fn intersection_to_world(record: &mut Intersection, object_to_world: &Mat4, world_to_object: &Mat4) {
    let normal_matrix = world_to_object.transpose();
    let transform_basis = |basis: &OrthonormalBasis| OrthonormalBasis {
        u: normal_matrix.transform_vector3(basis.u).normalize(),
        v: normal_matrix.transform_vector3(basis.v).normalize(),
        w: normal_matrix.transform_vector3(basis.w).normalize(),
    };
    record.point = object_to_world.transform_point3(record.point);
    record.geometric = transform_basis(&record.geometric);
    record.shading = transform_basis(&record.shading);
}

/// Nearest hit along the ray, or `None`. The returned record is in world
/// space with `primitive_index` set.
pub fn trace_closest(tables: &SceneTables, ray: &Ray) -> Option<Intersection> {
    let mut best_t = ray.t_max;
    let mut winner = -1i32;
    let mut winner_object_t = 0.0f32;
    let mut winner_triangle = -1i32;

    for index in 0..tables.primitive_count() {
        let row = tables.primitive(index);
        if !bounding_volume_gate(
            tables,
            row[PRIMITIVE_BV_KIND],
            row[PRIMITIVE_BV_OFFSET],
            ray.origin,
            ray.direction,
            ray.t_min,
            best_t,
        ) {
            continue;
        }

        let (object_to_world, world_to_object) = tables.matrix_pair(index);
        let bounded = Ray { t_max: best_t, ..*ray };
        let object_ray = ray_to_object(&bounded, &world_to_object);
        let mut mesh_scratch = -1;
        let t = shape_intersection_t(
            tables,
            row[PRIMITIVE_SHAPE_KIND],
            row[PRIMITIVE_SHAPE_OFFSET],
            object_ray.origin,
            object_ray.direction,
            object_ray.t_min,
            object_ray.t_max,
            &mut mesh_scratch,
        );
        if t <= 0.0 {
            continue;
        }

        let world_point =
            object_to_world.transform_point3(object_ray.origin + object_ray.direction * t);
        let world_t = world_point.distance(ray.origin);
        if world_t > ray.t_min && world_t < best_t {
            best_t = world_t;
            winner = index as i32;
            winner_object_t = t;
            winner_triangle = mesh_scratch;
        }
    }

    if winner < 0 {
        return None;
    }

    let index = winner as usize;
    let row = tables.primitive(index);
    let (object_to_world, world_to_object) = tables.matrix_pair(index);
    let object_ray = ray_to_object(ray, &world_to_object);

    let mut record = Intersection::default();
    shape_intersection_compute(
        tables,
        row[PRIMITIVE_SHAPE_KIND],
        row[PRIMITIVE_SHAPE_OFFSET],
        winner_object_t,
        object_ray.origin,
        object_ray.direction,
        winner_triangle,
        &mut record,
    );
    record.primitive_index = winner;
    intersection_to_world(&mut record, &object_to_world, &world_to_object);
    Some(record)
}

/// True when anything intersects the ray inside its t interval.
/// Short-circuits on the first hit; shadow rays use this.
pub fn trace_any(tables: &SceneTables, ray: &Ray) -> bool {
    for index in 0..tables.primitive_count() {
        let row = tables.primitive(index);
        if !bounding_volume_gate(
            tables,
            row[PRIMITIVE_BV_KIND],
            row[PRIMITIVE_BV_OFFSET],
            ray.origin,
            ray.direction,
            ray.t_min,
            ray.t_max,
        ) {
            continue;
        }
        let (_, world_to_object) = tables.matrix_pair(index);
        let object_ray = ray_to_object(ray, &world_to_object);
        if shape_intersects(
            tables,
            row[PRIMITIVE_SHAPE_KIND],
            row[PRIMITIVE_SHAPE_OFFSET],
            object_ray.origin,
            object_ray.direction,
            object_ray.t_min,
            object_ray.t_max,
        ) {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use scene_tables::*;

    fn push_matrix_pair(tables: &mut SceneTables, object_to_world: Mat4) {
        let world_to_object = object_to_world.inverse();
        tables
            .matrices
            .extend_from_slice(&object_to_world.transpose().to_cols_array());
        tables
            .matrices
            .extend_from_slice(&world_to_object.transpose().to_cols_array());
    }

    fn sphere_primitive(tables: &mut SceneTables, center: Vec3, radius: f32, transform: Mat4) {
        let shape_offset = tables.spheres.len() as i32;
        tables
            .spheres
            .extend_from_slice(&[center.x, center.y, center.z, radius]);
        tables.primitives.extend_from_slice(&[
            BOUNDING_VOLUME_INFINITE,
            0,
            SHAPE_SPHERE,
            shape_offset,
            MATERIAL_MATTE,
            0,
            LIGHT_NONE,
            0,
            tables.primitives.len() as i32 / PRIMITIVE_LENGTH as i32,
        ]);
        push_matrix_pair(tables, transform);
    }

    fn camera_tables() -> SceneTables {
        let mut tables = SceneTables::default();
        tables.camera[CAMERA_RESOLUTION_X] = 8.0;
        tables.camera[CAMERA_RESOLUTION_Y] = 8.0;
        tables
    }

    #[test]
    fn closest_of_two_spheres_wins() {
        let mut tables = camera_tables();
        sphere_primitive(&mut tables, Vec3::new(0.0, 0.0, 3.0), 1.0, Mat4::IDENTITY);
        sphere_primitive(&mut tables, Vec3::new(0.0, 0.0, 8.0), 1.0, Mat4::IDENTITY);

        let ray = Ray::new(Vec3::ZERO, Vec3::Z);
        let record = trace_closest(&tables, &ray).expect("hit");
        assert_eq!(record.primitive_index, 0);
        assert_relative_eq!(record.point.z, 2.0, epsilon = 1e-4);
        assert_relative_eq!(record.geometric.w.z, -1.0, epsilon = 1e-4);
    }

    #[test]
    fn translated_primitive_hits_through_its_transform() {
        let mut tables = camera_tables();
        sphere_primitive(
            &mut tables,
            Vec3::ZERO,
            1.0,
            Mat4::from_translation(Vec3::new(0.0, 0.0, 5.0)),
        );
        let ray = Ray::new(Vec3::ZERO, Vec3::Z);
        let record = trace_closest(&tables, &ray).expect("hit");
        assert_relative_eq!(record.point.z, 4.0, epsilon = 1e-4);
    }

    #[test]
    fn scaled_primitive_reports_world_distance() {
        let mut tables = camera_tables();
        // unit sphere scaled 2x, centered at z = 5: surface at z = 3
        sphere_primitive(
            &mut tables,
            Vec3::ZERO,
            1.0,
            Mat4::from_translation(Vec3::new(0.0, 0.0, 5.0)) * Mat4::from_scale(Vec3::splat(2.0)),
        );
        let ray = Ray::new(Vec3::ZERO, Vec3::Z);
        let record = trace_closest(&tables, &ray).expect("hit");
        assert_relative_eq!(record.point.z, 3.0, epsilon = 1e-3);
        assert_relative_eq!(record.geometric.w.z, -1.0, epsilon = 1e-3);
    }

    #[test]
    fn trace_any_respects_t_max() {
        let mut tables = camera_tables();
        sphere_primitive(&mut tables, Vec3::new(0.0, 0.0, 10.0), 1.0, Mat4::IDENTITY);
        let short = Ray::with_t_max(Vec3::ZERO, Vec3::Z, 5.0);
        assert!(!trace_any(&tables, &short));
        let long = Ray::new(Vec3::ZERO, Vec3::Z);
        assert!(trace_any(&tables, &long));
    }

    #[test]
    fn object_ray_round_trips_through_transform() {
        let transform = Mat4::from_translation(Vec3::new(1.0, -2.0, 0.5))
            * Mat4::from_rotation_y(0.7)
            * Mat4::from_scale(Vec3::new(2.0, 1.0, 0.5));
        let world_to_object = transform.inverse();
        let ray = Ray::new(Vec3::new(0.3, 0.2, -4.0), Vec3::new(0.1, 0.2, 0.97).normalize());
        let object_ray = ray_to_object(&ray, &world_to_object);
        let back_origin = transform.transform_point3(object_ray.origin);
        assert_relative_eq!(back_origin.x, ray.origin.x, epsilon = 1e-4);
        assert_relative_eq!(back_origin.y, ray.origin.y, epsilon = 1e-4);
        assert_relative_eq!(back_origin.z, ray.origin.z, epsilon = 1e-4);
        let back_direction = transform
            .transform_vector3(object_ray.direction)
            .normalize();
        assert_relative_eq!(back_direction.dot(ray.direction), 1.0, epsilon = 1e-4);
    }
}
