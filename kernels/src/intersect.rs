//! Object-space intersection tests for bounding volumes and shapes.
//!
//! Every shape exposes the same three operations: `*_intersection_t`
//! returns the parametric hit distance or 0.0 for a miss, `*_intersects`
//! is the boolean form, and `*_intersection_compute` fills the
//! object-space intersection frame for a known hit distance. Recoverable
//! numeric trouble is always a miss, never an error.

use glam::{Vec2, Vec3};
use scene_tables::{
    SceneTables, MESH_NODE_BV_OFFSET, MESH_NODE_HEADER_LENGTH, MESH_NODE_KIND, MESH_NODE_LEAF,
    MESH_NODE_NEXT, MESH_NODE_PAYLOAD,
};

use crate::sampling::{OrthonormalBasis, EPS};
use crate::solve::{solve_quadratic, solve_quartic};

/// The intersection record: geometric and shading frames, surface point and
/// texture coordinates. Filled in object space by `*_intersection_compute`,
/// transformed to world space by the primitive traversal.
#[derive(Clone, Copy, Debug)]
pub struct Intersection {
    pub geometric: OrthonormalBasis,
    pub shading: OrthonormalBasis,
    pub point: Vec3,
    pub uv: Vec2,
    pub primitive_index: i32,
}

impl Default for Intersection {
    fn default() -> Self {
        Self {
            geometric: OrthonormalBasis::from_w(Vec3::Z),
            shading: OrthonormalBasis::from_w(Vec3::Z),
            point: Vec3::ZERO,
            uv: Vec2::ZERO,
            primitive_index: -1,
        }
    }
}

fn read_vec3(table: &[f32], offset: usize) -> Vec3 {
    Vec3::new(table[offset], table[offset + 1], table[offset + 2])
}

// --- Bounding volumes -----------------------------------------------------

/// Slab test. Returns the entry distance, the exit distance when the origin
/// is inside the box, or 0.0 on a miss.
pub fn aabb_intersection_t(
    table: &[f32],
    offset: usize,
    ray_origin: Vec3,
    ray_direction: Vec3,
    t_min: f32,
    t_max: f32,
) -> f32 {
    let minimum = read_vec3(table, offset);
    let maximum = read_vec3(table, offset + 3);
    let inverse = ray_direction.recip();
    let t0 = (minimum - ray_origin) * inverse;
    let t1 = (maximum - ray_origin) * inverse;
    let near = t0.min(t1).max_element();
    let far = t0.max(t1).min_element();
    if near > far {
        return 0.0;
    }
    if near > t_min && near < t_max {
        near
    } else if far > t_min && far < t_max {
        // origin inside the box
        far
    } else {
        0.0
    }
}

/// True when the slab interval overlaps (t_min, t_max) at all. The gating
/// form of the slab test: unlike `aabb_intersection_t` it also accepts
/// boxes that enclose the whole t interval.
pub fn aabb_overlaps(
    table: &[f32],
    offset: usize,
    ray_origin: Vec3,
    ray_direction: Vec3,
    t_min: f32,
    t_max: f32,
) -> bool {
    let minimum = read_vec3(table, offset);
    let maximum = read_vec3(table, offset + 3);
    let inverse = ray_direction.recip();
    let t0 = (minimum - ray_origin) * inverse;
    let t1 = (maximum - ray_origin) * inverse;
    let near = t0.min(t1).max_element();
    let far = t0.max(t1).min_element();
    near <= far && far > t_min && near < t_max
}

pub fn aabb_contains(table: &[f32], offset: usize, point: Vec3) -> bool {
    let minimum = read_vec3(table, offset);
    let maximum = read_vec3(table, offset + 3);
    point.cmpge(minimum).all() && point.cmple(maximum).all()
}

pub fn bounding_sphere_intersection_t(
    table: &[f32],
    offset: usize,
    ray_origin: Vec3,
    ray_direction: Vec3,
    t_min: f32,
    t_max: f32,
) -> f32 {
    let center = read_vec3(table, offset);
    let radius = table[offset + 3];
    let oc = ray_origin - center;
    let b = 2.0 * oc.dot(ray_direction);
    let c = oc.length_squared() - radius * radius;
    solve_quadratic(1.0, b, c, t_min, t_max)
}

/// Gating form of the sphere test: true when the root interval overlaps
/// (t_min, t_max) at all.
pub fn bounding_sphere_overlaps(
    table: &[f32],
    offset: usize,
    ray_origin: Vec3,
    ray_direction: Vec3,
    t_min: f32,
    t_max: f32,
) -> bool {
    let center = read_vec3(table, offset);
    let radius = table[offset + 3];
    let oc = ray_origin - center;
    let b = oc.dot(ray_direction);
    let discriminant = b * b - (oc.length_squared() - radius * radius);
    if discriminant < 0.0 {
        return false;
    }
    let sqrt_discriminant = discriminant.sqrt();
    let entry = -b - sqrt_discriminant;
    let exit = -b + sqrt_discriminant;
    exit > t_min && entry < t_max
}

pub fn bounding_sphere_contains(table: &[f32], offset: usize, point: Vec3) -> bool {
    let center = read_vec3(table, offset);
    let radius = table[offset + 3];
    (point - center).length_squared() <= radius * radius
}

/// The world-space gate used by the primitive traversal: true when the ray
/// origin lies inside the volume or the ray crosses it inside (t_min,
/// t_max). The Infinite tag must be matched before any geometric test so
/// unbounded primitives are never short-circuited.
pub fn bounding_volume_gate(
    tables: &SceneTables,
    kind: i32,
    offset: i32,
    ray_origin: Vec3,
    ray_direction: Vec3,
    t_min: f32,
    t_max: f32,
) -> bool {
    if kind == scene_tables::BOUNDING_VOLUME_INFINITE {
        return true;
    }
    let offset = offset as usize;
    match kind {
        scene_tables::BOUNDING_VOLUME_AABB => {
            aabb_contains(&tables.aabbs, offset, ray_origin)
                || aabb_overlaps(&tables.aabbs, offset, ray_origin, ray_direction, t_min, t_max)
        }
        scene_tables::BOUNDING_VOLUME_SPHERE => {
            bounding_sphere_contains(&tables.bounding_spheres, offset, ray_origin)
                || bounding_sphere_overlaps(
                    &tables.bounding_spheres,
                    offset,
                    ray_origin,
                    ray_direction,
                    t_min,
                    t_max,
                )
        }
        _ => false,
    }
}

// --- Plane ----------------------------------------------------------------

pub fn plane_intersection_t(
    table: &[f32],
    offset: usize,
    ray_origin: Vec3,
    ray_direction: Vec3,
    t_min: f32,
    t_max: f32,
) -> f32 {
    let a = read_vec3(table, offset);
    let normal = read_vec3(table, offset + 9);
    let denominator = ray_direction.dot(normal);
    if denominator.abs() < EPS {
        return 0.0;
    }
    let t = (a - ray_origin).dot(normal) / denominator;
    if t > t_min && t < t_max {
        t
    } else {
        0.0
    }
}

pub fn plane_intersection_compute(
    table: &[f32],
    offset: usize,
    t: f32,
    ray_origin: Vec3,
    ray_direction: Vec3,
    out: &mut Intersection,
) {
    let a = read_vec3(table, offset);
    let b = read_vec3(table, offset + 3);
    let c = read_vec3(table, offset + 6);
    let normal = read_vec3(table, offset + 9);
    let point = ray_origin + ray_direction * t;

    let horizontal = b - a;
    let vertical = c - a;
    let relative = point - a;
    out.point = point;
    out.uv = Vec2::new(
        relative.dot(horizontal) / horizontal.length_squared(),
        relative.dot(vertical) / vertical.length_squared(),
    );
    out.geometric = OrthonormalBasis::from_w(normal.normalize());
    out.shading = out.geometric;
}

// --- Sphere ---------------------------------------------------------------

pub fn sphere_intersection_t(
    table: &[f32],
    offset: usize,
    ray_origin: Vec3,
    ray_direction: Vec3,
    t_min: f32,
    t_max: f32,
) -> f32 {
    let center = read_vec3(table, offset);
    let radius = table[offset + 3];
    let oc = ray_origin - center;
    let b = 2.0 * oc.dot(ray_direction);
    let c = oc.length_squared() - radius * radius;
    solve_quadratic(1.0, b, c, t_min, t_max)
}

pub fn sphere_intersection_compute(
    table: &[f32],
    offset: usize,
    t: f32,
    ray_origin: Vec3,
    ray_direction: Vec3,
    out: &mut Intersection,
) {
    let center = read_vec3(table, offset);
    let point = ray_origin + ray_direction * t;
    let normal = (point - center).normalize();
    out.point = point;
    out.uv = Vec2::new(
        0.5 + normal.y.atan2(normal.x) / (2.0 * core::f32::consts::PI),
        normal.z.clamp(-1.0, 1.0).acos() / core::f32::consts::PI,
    );
    out.geometric = OrthonormalBasis::from_w(normal);
    out.shading = out.geometric;
}

// --- Cuboid ---------------------------------------------------------------

pub fn cuboid_intersection_t(
    table: &[f32],
    offset: usize,
    ray_origin: Vec3,
    ray_direction: Vec3,
    t_min: f32,
    t_max: f32,
) -> f32 {
    aabb_intersection_t(table, offset, ray_origin, ray_direction, t_min, t_max)
}

pub fn cuboid_intersection_compute(
    table: &[f32],
    offset: usize,
    t: f32,
    ray_origin: Vec3,
    ray_direction: Vec3,
    out: &mut Intersection,
) {
    let minimum = read_vec3(table, offset);
    let maximum = read_vec3(table, offset + 3);
    let point = ray_origin + ray_direction * t;
    let extent = (maximum - minimum).max(Vec3::splat(EPS));

    // The hit face is the axis where the point sits on a slab boundary.
    let face_epsilon = extent.max_element() * 1e-4;
    let mut normal = Vec3::ZERO;
    for axis in 0..3 {
        if (point[axis] - minimum[axis]).abs() < face_epsilon {
            normal[axis] = -1.0;
            break;
        }
        if (point[axis] - maximum[axis]).abs() < face_epsilon {
            normal[axis] = 1.0;
            break;
        }
    }
    if normal == Vec3::ZERO {
        normal = Vec3::Z;
    }

    let local = (point - minimum) / extent;
    out.uv = if normal.x != 0.0 {
        Vec2::new(local.y, local.z)
    } else if normal.y != 0.0 {
        Vec2::new(local.x, local.z)
    } else {
        Vec2::new(local.x, local.y)
    };
    out.point = point;
    out.geometric = OrthonormalBasis::from_w(normal);
    out.shading = out.geometric;
}

// --- Torus ----------------------------------------------------------------

// Ring of radius `outer` in the XY plane, tube of radius `inner`.
fn torus_coefficients(
    inner: f32,
    outer: f32,
    ray_origin: Vec3,
    ray_direction: Vec3,
) -> (f64, f64, f64, f64, f64) {
    let o = ray_origin.as_dvec3();
    let d = ray_direction.as_dvec3();
    let ring2 = (outer as f64) * (outer as f64);
    let tube2 = (inner as f64) * (inner as f64);
    let m = o.dot(d);
    let k = o.length_squared() - ring2 - tube2;
    (
        1.0,
        4.0 * m,
        2.0 * k + 4.0 * m * m + 4.0 * ring2 * d.z * d.z,
        4.0 * m * k + 8.0 * ring2 * o.z * d.z,
        k * k + 4.0 * ring2 * (o.z * o.z - tube2),
    )
}

pub fn torus_intersection_t(
    table: &[f32],
    offset: usize,
    ray_origin: Vec3,
    ray_direction: Vec3,
    t_min: f32,
    t_max: f32,
) -> f32 {
    let inner = table[offset];
    let outer = table[offset + 1];
    let (a, b, c, d, e) = torus_coefficients(inner, outer, ray_origin, ray_direction);
    solve_quartic(a, b, c, d, e, t_min, t_max)
}

pub fn torus_intersection_compute(
    table: &[f32],
    offset: usize,
    t: f32,
    ray_origin: Vec3,
    ray_direction: Vec3,
    out: &mut Intersection,
) {
    let inner = table[offset];
    let outer = table[offset + 1];
    let point = ray_origin + ray_direction * t;

    // Gradient of (P.P - inner^2 - outer^2)^2 + 4 outer^2 (Pz^2 - inner^2).
    let k = point.length_squared() - inner * inner - outer * outer;
    let normal =
        (point * k + Vec3::new(0.0, 0.0, 2.0 * outer * outer * point.z)).normalize_or_zero();
    let normal = if normal == Vec3::ZERO { Vec3::Z } else { normal };

    let ring_distance = point.truncate().length();
    out.point = point;
    out.uv = Vec2::new(
        0.5 + point.y.atan2(point.x) / (2.0 * core::f32::consts::PI),
        0.5 + point.z.atan2(ring_distance - outer) / (2.0 * core::f32::consts::PI),
    );
    out.geometric = OrthonormalBasis::from_w(normal);
    out.shading = out.geometric;
}

// --- Triangle -------------------------------------------------------------

// Moller-Trumbore. Returns (t, u, v) barycentric weights for B and C.
pub(crate) fn triangle_hit(
    a: Vec3,
    b: Vec3,
    c: Vec3,
    ray_origin: Vec3,
    ray_direction: Vec3,
    t_min: f32,
    t_max: f32,
) -> Option<(f32, f32, f32)> {
    let edge_ab = b - a;
    let edge_ac = c - a;
    let p = ray_direction.cross(edge_ac);
    let determinant = edge_ab.dot(p);
    if determinant.abs() < EPS {
        return None;
    }
    let inverse_determinant = 1.0 / determinant;
    let to_origin = ray_origin - a;
    let u = to_origin.dot(p) * inverse_determinant;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let q = to_origin.cross(edge_ab);
    let v = ray_direction.dot(q) * inverse_determinant;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = edge_ac.dot(q) * inverse_determinant;
    if t > t_min && t < t_max {
        Some((t, u, v))
    } else {
        None
    }
}

pub fn triangle_intersection_t(
    table: &[f32],
    offset: usize,
    ray_origin: Vec3,
    ray_direction: Vec3,
    t_min: f32,
    t_max: f32,
) -> f32 {
    let a = read_vec3(table, offset);
    let b = read_vec3(table, offset + 3);
    let c = read_vec3(table, offset + 6);
    match triangle_hit(a, b, c, ray_origin, ray_direction, t_min, t_max) {
        Some((t, _, _)) => t,
        None => 0.0,
    }
}

pub fn triangle_intersection_compute(
    table: &[f32],
    offset: usize,
    t: f32,
    ray_origin: Vec3,
    ray_direction: Vec3,
    out: &mut Intersection,
) {
    let a = read_vec3(table, offset);
    let b = read_vec3(table, offset + 3);
    let c = read_vec3(table, offset + 6);
    let point = ray_origin + ray_direction * t;

    let (u, v) = match triangle_hit(a, b, c, ray_origin, ray_direction, t - 1.0, t + 1.0) {
        Some((_, u, v)) => (u, v),
        None => (0.0, 0.0),
    };
    let w = 1.0 - u - v;

    let uv_a = Vec2::new(table[offset + 9], table[offset + 10]);
    let uv_b = Vec2::new(table[offset + 11], table[offset + 12]);
    let uv_c = Vec2::new(table[offset + 13], table[offset + 14]);
    let basis_w_a = read_vec3(table, offset + 15);
    let basis_v_a = read_vec3(table, offset + 18);
    let basis_w_b = read_vec3(table, offset + 21);
    let basis_v_b = read_vec3(table, offset + 24);
    let basis_w_c = read_vec3(table, offset + 27);
    let basis_v_c = read_vec3(table, offset + 30);

    let face_normal = (b - a).cross(c - a).normalize();
    let shading_w = (basis_w_a * w + basis_w_b * u + basis_w_c * v).normalize();
    let shading_v = basis_v_a * w + basis_v_b * u + basis_v_c * v;

    out.point = point;
    out.uv = uv_a * w + uv_b * u + uv_c * v;
    out.geometric = OrthonormalBasis::from_w(face_normal);
    out.shading = OrthonormalBasis::from_wv(shading_w, shading_v);
}

// --- Triangle mesh (flattened BVH) ----------------------------------------

/// Walk the mesh's BVH stream. Offsets inside a node are relative to the
/// mesh's root; a next-sibling of 0 ends the walk. The winning triangle
/// offset lands in `winning_triangle` so `intersection_compute` can
/// re-enter the right triangle.
pub fn triangle_mesh_intersection_t(
    tables: &SceneTables,
    offset: usize,
    ray_origin: Vec3,
    ray_direction: Vec3,
    t_min: f32,
    t_max: f32,
    winning_triangle: &mut i32,
) -> f32 {
    let mesh = &tables.triangle_meshes;
    let mut best = 0.0f32;
    let mut best_t_max = t_max;
    let mut cursor = offset;

    loop {
        let kind = mesh[cursor + MESH_NODE_KIND];
        let bv_offset = mesh[cursor + MESH_NODE_BV_OFFSET] as usize;
        let next = mesh[cursor + MESH_NODE_NEXT] as usize;

        let gate = aabb_overlaps(
            &tables.aabbs,
            bv_offset,
            ray_origin,
            ray_direction,
            t_min,
            best_t_max,
        );

        let jump = if kind == MESH_NODE_LEAF {
            if gate {
                let count = mesh[cursor + MESH_NODE_PAYLOAD] as usize;
                for i in 0..count {
                    let triangle_offset = mesh[cursor + MESH_NODE_HEADER_LENGTH + i] as i32;
                    let t = triangle_intersection_t(
                        &tables.triangles,
                        triangle_offset as usize,
                        ray_origin,
                        ray_direction,
                        t_min,
                        best_t_max,
                    );
                    if t > 0.0 {
                        best = t;
                        best_t_max = t;
                        *winning_triangle = triangle_offset;
                    }
                }
            }
            next
        } else if gate {
            mesh[cursor + MESH_NODE_PAYLOAD] as usize
        } else {
            next
        };

        if jump == 0 {
            break;
        }
        cursor = offset + jump;
    }
    best
}

pub fn triangle_mesh_intersection_compute(
    tables: &SceneTables,
    t: f32,
    ray_origin: Vec3,
    ray_direction: Vec3,
    winning_triangle: i32,
    out: &mut Intersection,
) {
    if winning_triangle < 0 {
        return;
    }
    triangle_intersection_compute(
        &tables.triangles,
        winning_triangle as usize,
        t,
        ray_origin,
        ray_direction,
        out,
    );
}

// --- Kind dispatch --------------------------------------------------------

/// Object-space hit distance for a shape of the given kind; 0.0 on a miss
/// or unknown kind.
pub fn shape_intersection_t(
    tables: &SceneTables,
    kind: i32,
    offset: i32,
    ray_origin: Vec3,
    ray_direction: Vec3,
    t_min: f32,
    t_max: f32,
    winning_triangle: &mut i32,
) -> f32 {
    let offset = offset as usize;
    match kind {
        scene_tables::SHAPE_PLANE => {
            plane_intersection_t(&tables.planes, offset, ray_origin, ray_direction, t_min, t_max)
        }
        scene_tables::SHAPE_SPHERE => {
            sphere_intersection_t(&tables.spheres, offset, ray_origin, ray_direction, t_min, t_max)
        }
        scene_tables::SHAPE_CUBOID => {
            cuboid_intersection_t(&tables.cuboids, offset, ray_origin, ray_direction, t_min, t_max)
        }
        scene_tables::SHAPE_TORUS => {
            torus_intersection_t(&tables.toruses, offset, ray_origin, ray_direction, t_min, t_max)
        }
        scene_tables::SHAPE_TRIANGLE => triangle_intersection_t(
            &tables.triangles,
            offset,
            ray_origin,
            ray_direction,
            t_min,
            t_max,
        ),
        scene_tables::SHAPE_TRIANGLE_MESH => triangle_mesh_intersection_t(
            tables,
            offset,
            ray_origin,
            ray_direction,
            t_min,
            t_max,
            winning_triangle,
        ),
        _ => 0.0,
    }
}

pub fn shape_intersects(
    tables: &SceneTables,
    kind: i32,
    offset: i32,
    ray_origin: Vec3,
    ray_direction: Vec3,
    t_min: f32,
    t_max: f32,
) -> bool {
    let mut scratch = -1;
    shape_intersection_t(
        tables,
        kind,
        offset,
        ray_origin,
        ray_direction,
        t_min,
        t_max,
        &mut scratch,
    ) > 0.0
}

/// Fill the object-space intersection record for a known hit.
#[allow(clippy::too_many_arguments)]
pub fn shape_intersection_compute(
    tables: &SceneTables,
    kind: i32,
    offset: i32,
    t: f32,
    ray_origin: Vec3,
    ray_direction: Vec3,
    winning_triangle: i32,
    out: &mut Intersection,
) {
    let offset = offset as usize;
    match kind {
        scene_tables::SHAPE_PLANE => {
            plane_intersection_compute(&tables.planes, offset, t, ray_origin, ray_direction, out)
        }
        scene_tables::SHAPE_SPHERE => {
            sphere_intersection_compute(&tables.spheres, offset, t, ray_origin, ray_direction, out)
        }
        scene_tables::SHAPE_CUBOID => {
            cuboid_intersection_compute(&tables.cuboids, offset, t, ray_origin, ray_direction, out)
        }
        scene_tables::SHAPE_TORUS => {
            torus_intersection_compute(&tables.toruses, offset, t, ray_origin, ray_direction, out)
        }
        scene_tables::SHAPE_TRIANGLE => triangle_intersection_compute(
            &tables.triangles,
            offset,
            t,
            ray_origin,
            ray_direction,
            out,
        ),
        scene_tables::SHAPE_TRIANGLE_MESH => triangle_mesh_intersection_compute(
            tables,
            t,
            ray_origin,
            ray_direction,
            winning_triangle,
            out,
        ),
        _ => {}
    }
}
