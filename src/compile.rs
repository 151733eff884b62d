//! Host-side table builders: the bridge between a scene description and
//! the packed arrays the kernel consumes. Shapes are packed in object
//! space, bounding volumes in world space; triangle meshes get their BVH
//! flattened into the skip-pointer stream the kernel walks.

use std::collections::HashMap;

use glam::{Mat4, Vec2, Vec3};
use image::DynamicImage;
use scene_tables::*;

#[derive(Clone, Copy, Debug)]
pub struct TextureRef {
    pub kind: i32,
    pub offset: i32,
}

#[derive(Clone, Copy, Debug)]
pub struct MaterialRef {
    pub kind: i32,
    pub offset: i32,
}

#[derive(Clone, Copy, Debug)]
pub struct ShapeRef {
    pub kind: i32,
    pub offset: i32,
}

#[derive(Clone, Copy, Debug)]
pub struct LightRef {
    pub kind: i32,
    pub offset: i32,
}

/// Incrementally packs a scene into `SceneTables`.
#[derive(Default)]
pub struct SceneBuilder {
    tables: SceneTables,
    mesh_bounds: HashMap<i32, (Vec3, Vec3)>,
    next_instance_id: i32,
}

impl SceneBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn build(self) -> SceneTables {
        self.tables
    }

    // --- Camera ---------------------------------------------------------

    /// Thin-lens camera looking from `eye` at `target`. Field-of-view
    /// angles are radians.
    pub fn look_at_camera(
        &mut self,
        eye: Vec3,
        target: Vec3,
        up: Vec3,
        fov_x: f32,
        fov_y: f32,
        resolution_x: u32,
        resolution_y: u32,
    ) {
        let w = (target - eye).normalize();
        let u = up.cross(w).normalize();
        let v = w.cross(u);

        let camera = &mut self.tables.camera;
        camera[CAMERA_FOV_X] = fov_x;
        camera[CAMERA_FOV_Y] = fov_y;
        camera[CAMERA_LENS] = LENS_THIN;
        camera[CAMERA_U..CAMERA_U + 3].copy_from_slice(&u.to_array());
        camera[CAMERA_V..CAMERA_V + 3].copy_from_slice(&v.to_array());
        camera[CAMERA_W..CAMERA_W + 3].copy_from_slice(&w.to_array());
        camera[CAMERA_EYE..CAMERA_EYE + 3].copy_from_slice(&eye.to_array());
        camera[CAMERA_APERTURE_RADIUS] = 0.0;
        camera[CAMERA_FOCAL_DISTANCE] = (target - eye).length();
        camera[CAMERA_RESOLUTION_X] = resolution_x as f32;
        camera[CAMERA_RESOLUTION_Y] = resolution_y as f32;
    }

    pub fn set_thin_lens(&mut self, aperture_radius: f32, focal_distance: f32) {
        self.tables.camera[CAMERA_LENS] = LENS_THIN;
        self.tables.camera[CAMERA_APERTURE_RADIUS] = aperture_radius;
        self.tables.camera[CAMERA_FOCAL_DISTANCE] = focal_distance;
    }

    pub fn set_fisheye(&mut self) {
        self.tables.camera[CAMERA_LENS] = LENS_FISHEYE;
    }

    // --- Textures -------------------------------------------------------

    pub fn constant_texture(&mut self, color: Vec3) -> TextureRef {
        let offset = self.tables.textures_constant.len() as i32;
        self.tables.textures_constant.extend_from_slice(&color.to_array());
        TextureRef {
            kind: TEXTURE_CONSTANT,
            offset,
        }
    }

    pub fn checkerboard_texture(
        &mut self,
        a: TextureRef,
        b: TextureRef,
        angle: f32,
        scale: Vec2,
    ) -> TextureRef {
        let offset = self.tables.textures_checkerboard.len() as i32;
        self.tables.textures_checkerboard.extend_from_slice(&[
            a.kind as f32,
            a.offset as f32,
            b.kind as f32,
            b.offset as f32,
            angle,
            scale.x,
            scale.y,
        ]);
        TextureRef {
            kind: TEXTURE_CHECKERBOARD,
            offset,
        }
    }

    pub fn bullseye_texture(
        &mut self,
        a: TextureRef,
        b: TextureRef,
        origin: Vec3,
        scale: f32,
    ) -> TextureRef {
        let offset = self.tables.textures_bullseye.len() as i32;
        self.tables.textures_bullseye.extend_from_slice(&[
            a.kind as f32,
            a.offset as f32,
            b.kind as f32,
            b.offset as f32,
            origin.x,
            origin.y,
            origin.z,
            scale,
        ]);
        TextureRef {
            kind: TEXTURE_BULLSEYE,
            offset,
        }
    }

    pub fn blend_texture(&mut self, a: TextureRef, b: TextureRef, factor: Vec3) -> TextureRef {
        let offset = self.tables.textures_blend.len() as i32;
        self.tables.textures_blend.extend_from_slice(&[
            a.kind as f32,
            a.offset as f32,
            b.kind as f32,
            b.offset as f32,
            factor.x,
            factor.y,
            factor.z,
        ]);
        TextureRef {
            kind: TEXTURE_BLEND,
            offset,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn marble_texture(
        &mut self,
        color_a: Vec3,
        color_b: Vec3,
        color_c: Vec3,
        frequency: f32,
        scale: f32,
        stripes: f32,
        octaves: i32,
    ) -> TextureRef {
        let offset = self.tables.textures_marble.len() as i32;
        self.tables.textures_marble.extend_from_slice(&color_a.to_array());
        self.tables.textures_marble.extend_from_slice(&color_b.to_array());
        self.tables.textures_marble.extend_from_slice(&color_c.to_array());
        self.tables
            .textures_marble
            .extend_from_slice(&[frequency, scale, stripes, octaves as f32]);
        TextureRef {
            kind: TEXTURE_MARBLE,
            offset,
        }
    }

    pub fn simplex_fbm_texture(
        &mut self,
        color: Vec3,
        frequency: f32,
        gain: f32,
        octaves: i32,
    ) -> TextureRef {
        let offset = self.tables.textures_simplex_fbm.len() as i32;
        self.tables.textures_simplex_fbm.extend_from_slice(&color.to_array());
        self.tables
            .textures_simplex_fbm
            .extend_from_slice(&[frequency, gain, octaves as f32]);
        TextureRef {
            kind: TEXTURE_SIMPLEX_FBM,
            offset,
        }
    }

    pub fn ldr_image_texture(
        &mut self,
        image: &DynamicImage,
        angle: f32,
        scale: Vec2,
    ) -> TextureRef {
        let offset = self.tables.textures_ldr_image.len() as i32;
        pack_ldr_image(&mut self.tables.textures_ldr_image, image, angle, scale);
        TextureRef {
            kind: TEXTURE_LDR_IMAGE,
            offset,
        }
    }

    pub fn surface_normal_texture(&self) -> TextureRef {
        TextureRef {
            kind: TEXTURE_SURFACE_NORMAL,
            offset: 0,
        }
    }

    pub fn uv_texture(&self) -> TextureRef {
        TextureRef {
            kind: TEXTURE_UV,
            offset: 0,
        }
    }

    /// A host-side function texture is evaluated once at build time; the
    /// kernel sees only the resulting color.
    pub fn function_texture(&mut self, function: impl Fn() -> Vec3) -> TextureRef {
        let offset = self.tables.textures_function.len() as i32;
        let color = function();
        self.tables.textures_function.extend_from_slice(&color.to_array());
        TextureRef {
            kind: TEXTURE_FUNCTION,
            offset,
        }
    }

    // --- Materials ------------------------------------------------------

    fn black_emission(&mut self) -> TextureRef {
        self.constant_texture(Vec3::ZERO)
    }

    pub fn matte_material(&mut self, emission: TextureRef, diffuse: TextureRef) -> MaterialRef {
        let offset = self.tables.materials_matte.len() as i32;
        push_texture_refs(&mut self.tables.materials_matte, &[emission, diffuse]);
        MaterialRef {
            kind: MATERIAL_MATTE,
            offset,
        }
    }

    pub fn matte_from_color(&mut self, diffuse: Vec3) -> MaterialRef {
        let emission = self.black_emission();
        let diffuse = self.constant_texture(diffuse);
        self.matte_material(emission, diffuse)
    }

    pub fn mirror_material(&mut self, emission: TextureRef, reflectance: TextureRef) -> MaterialRef {
        let offset = self.tables.materials_mirror.len() as i32;
        push_texture_refs(&mut self.tables.materials_mirror, &[emission, reflectance]);
        MaterialRef {
            kind: MATERIAL_MIRROR,
            offset,
        }
    }

    pub fn mirror_from_color(&mut self, reflectance: Vec3) -> MaterialRef {
        let emission = self.black_emission();
        let reflectance = self.constant_texture(reflectance);
        self.mirror_material(emission, reflectance)
    }

    /// Glass with textured eta; `None` packs the default constant 1.5.
    pub fn glass_material(
        &mut self,
        emission: TextureRef,
        reflectance: TextureRef,
        transmittance: TextureRef,
        eta: Option<TextureRef>,
    ) -> MaterialRef {
        let eta = eta.unwrap_or_else(|| self.constant_texture(Vec3::splat(1.5)));
        let offset = self.tables.materials_glass.len() as i32;
        push_texture_refs(
            &mut self.tables.materials_glass,
            &[emission, reflectance, transmittance, eta],
        );
        MaterialRef {
            kind: MATERIAL_GLASS,
            offset,
        }
    }

    pub fn metal_material(
        &mut self,
        emission: TextureRef,
        reflectance: TextureRef,
        roughness: TextureRef,
    ) -> MaterialRef {
        let offset = self.tables.materials_metal.len() as i32;
        push_texture_refs(
            &mut self.tables.materials_metal,
            &[emission, reflectance, roughness],
        );
        MaterialRef {
            kind: MATERIAL_METAL,
            offset,
        }
    }

    pub fn clear_coat_material(
        &mut self,
        emission: TextureRef,
        diffuse: TextureRef,
        specular: TextureRef,
    ) -> MaterialRef {
        let offset = self.tables.materials_clear_coat.len() as i32;
        push_texture_refs(
            &mut self.tables.materials_clear_coat,
            &[emission, diffuse, specular],
        );
        MaterialRef {
            kind: MATERIAL_CLEAR_COAT,
            offset,
        }
    }

    // --- Lights ---------------------------------------------------------

    fn enumerate_light(&mut self, kind: i32, offset: i32) -> LightRef {
        self.tables.light_enumeration.extend_from_slice(&[kind, offset]);
        LightRef { kind, offset }
    }

    pub fn point_light(&mut self, position: Vec3, intensity: Vec3) -> LightRef {
        let offset = self.tables.lights_point.len() as i32;
        self.tables.lights_point.extend_from_slice(&position.to_array());
        self.tables.lights_point.extend_from_slice(&intensity.to_array());
        self.enumerate_light(LIGHT_POINT, offset)
    }

    /// Cone angles are radians, measured from the spot axis.
    pub fn spot_light(
        &mut self,
        position: Vec3,
        direction: Vec3,
        intensity: Vec3,
        inner_angle: f32,
        outer_angle: f32,
    ) -> LightRef {
        let offset = self.tables.lights_spot.len() as i32;
        self.tables.lights_spot.extend_from_slice(&position.to_array());
        self.tables
            .lights_spot
            .extend_from_slice(&direction.normalize().to_array());
        self.tables.lights_spot.extend_from_slice(&intensity.to_array());
        self.tables
            .lights_spot
            .extend_from_slice(&[inner_angle.cos(), outer_angle.cos()]);
        self.enumerate_light(LIGHT_SPOT, offset)
    }

    pub fn directional_light(&mut self, direction: Vec3, radiance: Vec3) -> LightRef {
        let offset = self.tables.lights_directional.len() as i32;
        self.tables
            .lights_directional
            .extend_from_slice(&direction.normalize().to_array());
        self.tables.lights_directional.extend_from_slice(&radiance.to_array());
        self.enumerate_light(LIGHT_DIRECTIONAL, offset)
    }

    pub fn ldr_image_light(&mut self, image: &DynamicImage, angle: f32, scale: Vec2) -> LightRef {
        let offset = self.tables.lights_ldr_image.len() as i32;
        pack_ldr_image(&mut self.tables.lights_ldr_image, image, angle, scale);
        self.enumerate_light(LIGHT_LDR_IMAGE, offset)
    }

    /// Preetham sky: the Perez coefficients and zenith color are
    /// precomputed here from turbidity so the kernel only evaluates.
    pub fn perez_light(&mut self, sun_direction: Vec3, turbidity: f32, radiance_scale: f32) -> LightRef {
        let sun = sun_direction.normalize();
        let theta_sun = sun.y.clamp(-1.0, 1.0).acos();
        let (zenith, coefficients_y, coefficients_x, coefficients_yy) =
            preetham_parameters(turbidity, theta_sun);

        let offset = self.tables.lights_perez.len() as i32;
        let table = &mut self.tables.lights_perez;
        table.extend_from_slice(&sun.to_array());
        table.push(theta_sun);
        table.extend_from_slice(&zenith.to_array());
        table.extend_from_slice(&coefficients_y);
        table.extend_from_slice(&coefficients_x);
        table.extend_from_slice(&coefficients_yy);
        table.push(radiance_scale);
        self.enumerate_light(LIGHT_PEREZ, offset)
    }

    // --- Shapes ---------------------------------------------------------

    /// Plane through `a` with surface normal from `(b - a) x (c - a)`;
    /// `b` and `c` also parameterize its UVs.
    pub fn plane(&mut self, a: Vec3, b: Vec3, c: Vec3) -> ShapeRef {
        let normal = (b - a).cross(c - a).normalize();
        let offset = self.tables.planes.len() as i32;
        self.tables.planes.extend_from_slice(&a.to_array());
        self.tables.planes.extend_from_slice(&b.to_array());
        self.tables.planes.extend_from_slice(&c.to_array());
        self.tables.planes.extend_from_slice(&normal.to_array());
        ShapeRef {
            kind: SHAPE_PLANE,
            offset,
        }
    }

    pub fn sphere(&mut self, center: Vec3, radius: f32) -> ShapeRef {
        let offset = self.tables.spheres.len() as i32;
        self.tables.spheres.extend_from_slice(&center.to_array());
        self.tables.spheres.push(radius);
        ShapeRef {
            kind: SHAPE_SPHERE,
            offset,
        }
    }

    pub fn cuboid(&mut self, minimum: Vec3, maximum: Vec3) -> ShapeRef {
        let offset = self.tables.cuboids.len() as i32;
        self.tables.cuboids.extend_from_slice(&minimum.to_array());
        self.tables.cuboids.extend_from_slice(&maximum.to_array());
        ShapeRef {
            kind: SHAPE_CUBOID,
            offset,
        }
    }

    /// Tube radius `inner` around a ring of radius `outer` in the XY plane.
    pub fn torus(&mut self, inner: f32, outer: f32) -> ShapeRef {
        let offset = self.tables.toruses.len() as i32;
        self.tables.toruses.extend_from_slice(&[inner, outer]);
        ShapeRef {
            kind: SHAPE_TORUS,
            offset,
        }
    }

    pub fn triangle(&mut self, a: Vec3, b: Vec3, c: Vec3) -> ShapeRef {
        self.triangle_with_uvs(
            a,
            b,
            c,
            [Vec2::ZERO, Vec2::new(1.0, 0.0), Vec2::new(0.0, 1.0)],
        )
    }

    pub fn triangle_with_uvs(&mut self, a: Vec3, b: Vec3, c: Vec3, uvs: [Vec2; 3]) -> ShapeRef {
        let normal = (b - a).cross(c - a).normalize();
        let tangent = (b - a).normalize();
        let offset = self.tables.triangles.len() as i32;
        let table = &mut self.tables.triangles;
        table.extend_from_slice(&a.to_array());
        table.extend_from_slice(&b.to_array());
        table.extend_from_slice(&c.to_array());
        for uv in uvs {
            table.extend_from_slice(&[uv.x, uv.y]);
        }
        for _ in 0..3 {
            table.extend_from_slice(&normal.to_array());
            table.extend_from_slice(&tangent.to_array());
        }
        ShapeRef {
            kind: SHAPE_TRIANGLE,
            offset,
        }
    }

    /// Pack an indexed mesh: per-face triangles plus a flattened BVH whose
    /// node boxes land in the shared AABB table.
    pub fn triangle_mesh(
        &mut self,
        positions: &[Vec3],
        indices: &[[u32; 3]],
        uvs: Option<&[Vec2]>,
    ) -> ShapeRef {
        let mut faces = Vec::with_capacity(indices.len());
        for face in indices {
            let a = positions[face[0] as usize];
            let b = positions[face[1] as usize];
            let c = positions[face[2] as usize];
            let face_uvs = match uvs {
                Some(uvs) => [
                    uvs[face[0] as usize],
                    uvs[face[1] as usize],
                    uvs[face[2] as usize],
                ],
                None => [Vec2::ZERO, Vec2::new(1.0, 0.0), Vec2::new(0.0, 1.0)],
            };
            let shape = self.triangle_with_uvs(a, b, c, face_uvs);
            faces.push(MeshFace {
                triangle_offset: shape.offset,
                minimum: a.min(b).min(c),
                maximum: a.max(b).max(c),
                centroid: (a + b + c) / 3.0,
            });
        }

        let root = build_bvh(&mut faces);
        let mut stream = Vec::new();
        let mut cursor = 0usize;
        assign_positions(&root, &mut cursor);
        serialize_bvh(&root, 0, &mut stream, &mut self.tables.aabbs, &faces);

        let offset = self.tables.triangle_meshes.len() as i32;
        self.tables.triangle_meshes.extend_from_slice(&stream);

        let minimum = faces.iter().map(|f| f.minimum).fold(Vec3::MAX, Vec3::min);
        let maximum = faces.iter().map(|f| f.maximum).fold(Vec3::MIN, Vec3::max);
        self.mesh_bounds.insert(offset, (minimum, maximum));
        ShapeRef {
            kind: SHAPE_TRIANGLE_MESH,
            offset,
        }
    }

    // --- Primitives -----------------------------------------------------

    pub fn primitive(
        &mut self,
        shape: ShapeRef,
        material: MaterialRef,
        object_to_world: Mat4,
    ) -> usize {
        self.primitive_with_area_light(shape, material, object_to_world, None)
    }

    pub fn primitive_with_area_light(
        &mut self,
        shape: ShapeRef,
        material: MaterialRef,
        object_to_world: Mat4,
        area_light: Option<LightRef>,
    ) -> usize {
        let (bv_kind, bv_offset) = self.world_bounding_volume(shape, &object_to_world);
        let (light_kind, light_offset) = match area_light {
            Some(light) => (light.kind, light.offset),
            None => (LIGHT_NONE, 0),
        };
        let index = self.tables.primitive_count();
        let instance_id = self.next_instance_id;
        self.next_instance_id += 1;
        self.tables.primitives.extend_from_slice(&[
            bv_kind,
            bv_offset,
            shape.kind,
            shape.offset,
            material.kind,
            material.offset,
            light_kind,
            light_offset,
            instance_id,
        ]);
        self.tables
            .matrices
            .extend_from_slice(&object_to_world.transpose().to_cols_array());
        self.tables
            .matrices
            .extend_from_slice(&object_to_world.inverse().transpose().to_cols_array());
        index
    }

    /// An emissive world-space triangle: registers the diffuse area light,
    /// the matching shape, and the primitive linking the two.
    pub fn emissive_triangle(
        &mut self,
        a: Vec3,
        b: Vec3,
        c: Vec3,
        radiance: Vec3,
        two_sided: bool,
        material: MaterialRef,
    ) -> usize {
        let area = 0.5 * (b - a).cross(c - a).length();
        let offset = self.tables.lights_diffuse_area.len() as i32;
        let table = &mut self.tables.lights_diffuse_area;
        table.extend_from_slice(&radiance.to_array());
        table.extend_from_slice(&a.to_array());
        table.extend_from_slice(&b.to_array());
        table.extend_from_slice(&c.to_array());
        table.extend_from_slice(&[area, if two_sided { 1.0 } else { 0.0 }]);
        let light = self.enumerate_light(LIGHT_DIFFUSE_AREA, offset);

        let shape = self.triangle(a, b, c);
        self.primitive_with_area_light(shape, material, Mat4::IDENTITY, Some(light))
    }

    fn world_bounding_volume(&mut self, shape: ShapeRef, object_to_world: &Mat4) -> (i32, i32) {
        match shape.kind {
            SHAPE_PLANE => (BOUNDING_VOLUME_INFINITE, 0),
            SHAPE_SPHERE => {
                let offset = shape.offset as usize;
                let center = Vec3::new(
                    self.tables.spheres[offset],
                    self.tables.spheres[offset + 1],
                    self.tables.spheres[offset + 2],
                );
                let radius = self.tables.spheres[offset + 3];
                let world_center = object_to_world.transform_point3(center);
                let scale = maximum_scale(object_to_world);
                let bv_offset = self.tables.bounding_spheres.len() as i32;
                self.tables
                    .bounding_spheres
                    .extend_from_slice(&world_center.to_array());
                self.tables.bounding_spheres.push(radius * scale);
                (BOUNDING_VOLUME_SPHERE, bv_offset)
            }
            _ => match self.object_bounds(shape) {
                Some((minimum, maximum)) => {
                    let (world_min, world_max) =
                        transform_aabb(object_to_world, minimum, maximum);
                    let bv_offset = self.tables.aabbs.len() as i32;
                    self.tables.aabbs.extend_from_slice(&world_min.to_array());
                    self.tables.aabbs.extend_from_slice(&world_max.to_array());
                    (BOUNDING_VOLUME_AABB, bv_offset)
                }
                None => (BOUNDING_VOLUME_INFINITE, 0),
            },
        }
    }

    fn object_bounds(&self, shape: ShapeRef) -> Option<(Vec3, Vec3)> {
        let offset = shape.offset as usize;
        match shape.kind {
            SHAPE_CUBOID => {
                let table = &self.tables.cuboids;
                Some((
                    Vec3::new(table[offset], table[offset + 1], table[offset + 2]),
                    Vec3::new(table[offset + 3], table[offset + 4], table[offset + 5]),
                ))
            }
            SHAPE_TORUS => {
                let inner = self.tables.toruses[offset];
                let outer = self.tables.toruses[offset + 1];
                let reach = inner + outer;
                Some((
                    Vec3::new(-reach, -reach, -inner),
                    Vec3::new(reach, reach, inner),
                ))
            }
            SHAPE_TRIANGLE => {
                let table = &self.tables.triangles;
                let a = Vec3::new(table[offset], table[offset + 1], table[offset + 2]);
                let b = Vec3::new(table[offset + 3], table[offset + 4], table[offset + 5]);
                let c = Vec3::new(table[offset + 6], table[offset + 7], table[offset + 8]);
                Some((a.min(b).min(c), a.max(b).max(c)))
            }
            SHAPE_TRIANGLE_MESH => self.mesh_bounds.get(&shape.offset).copied(),
            _ => None,
        }
    }
}

fn push_texture_refs(table: &mut Vec<f32>, refs: &[TextureRef]) {
    for reference in refs {
        table.push(reference.kind as f32);
        table.push(reference.offset as f32);
    }
}

fn maximum_scale(matrix: &Mat4) -> f32 {
    let x = matrix.transform_vector3(Vec3::X).length();
    let y = matrix.transform_vector3(Vec3::Y).length();
    let z = matrix.transform_vector3(Vec3::Z).length();
    x.max(y).max(z)
}

fn transform_aabb(matrix: &Mat4, minimum: Vec3, maximum: Vec3) -> (Vec3, Vec3) {
    let mut world_min = Vec3::MAX;
    let mut world_max = Vec3::MIN;
    for i in 0..8 {
        let corner = Vec3::new(
            if i & 1 == 0 { minimum.x } else { maximum.x },
            if i & 2 == 0 { minimum.y } else { maximum.y },
            if i & 4 == 0 { minimum.z } else { maximum.z },
        );
        let world = matrix.transform_point3(corner);
        world_min = world_min.min(world);
        world_max = world_max.max(world);
    }
    (world_min, world_max)
}

/// Pack an image as the inlined LDR format: header plus one packed-RGB
/// float per pixel.
fn pack_ldr_image(table: &mut Vec<f32>, image: &DynamicImage, angle: f32, scale: Vec2) {
    let rgb = image.to_rgb8();
    let (width, height) = rgb.dimensions();
    table.extend_from_slice(&[
        angle,
        scale.x,
        scale.y,
        width as f32,
        height as f32,
        (width * height) as f32,
    ]);
    for pixel in rgb.pixels() {
        table.push(pack_rgb(pixel.0[0], pixel.0[1], pixel.0[2]));
    }
}

// --- Mesh BVH -------------------------------------------------------------

struct MeshFace {
    triangle_offset: i32,
    minimum: Vec3,
    maximum: Vec3,
    centroid: Vec3,
}

enum BvhNode {
    Leaf {
        position: std::cell::Cell<usize>,
        faces: Vec<usize>,
    },
    Internal {
        position: std::cell::Cell<usize>,
        minimum: Vec3,
        maximum: Vec3,
        left: Box<BvhNode>,
        right: Box<BvhNode>,
    },
}

const LEAF_FACE_LIMIT: usize = 4;

/// Midpoint split over the longest axis, leaves capped at a few faces.
fn build_bvh(faces: &mut [MeshFace]) -> BvhNode {
    let all: Vec<usize> = (0..faces.len()).collect();
    build_bvh_recursive(faces, all)
}

fn build_bvh_recursive(faces: &[MeshFace], members: Vec<usize>) -> BvhNode {
    let minimum = members
        .iter()
        .map(|&i| faces[i].minimum)
        .fold(Vec3::MAX, Vec3::min);
    let maximum = members
        .iter()
        .map(|&i| faces[i].maximum)
        .fold(Vec3::MIN, Vec3::max);

    if members.len() <= LEAF_FACE_LIMIT {
        return BvhNode::Leaf {
            position: Default::default(),
            faces: members,
        };
    }

    let extent = maximum - minimum;
    let axis = if extent.x >= extent.y && extent.x >= extent.z {
        0
    } else if extent.y >= extent.z {
        1
    } else {
        2
    };
    let split = minimum[axis] + extent[axis] * 0.5;

    let (left, right): (Vec<usize>, Vec<usize>) = members
        .iter()
        .copied()
        .partition(|&i| faces[i].centroid[axis] < split);
    if left.is_empty() || right.is_empty() {
        return BvhNode::Leaf {
            position: Default::default(),
            faces: members,
        };
    }

    BvhNode::Internal {
        position: Default::default(),
        minimum,
        maximum,
        left: Box::new(build_bvh_recursive(faces, left)),
        right: Box::new(build_bvh_recursive(faces, right)),
    }
}

/// First pass: give every node its position in the flat stream, so the
/// skip pointers can be emitted in one serialization pass.
fn assign_positions(node: &BvhNode, cursor: &mut usize) {
    match node {
        BvhNode::Leaf { position, faces } => {
            position.set(*cursor);
            *cursor += MESH_NODE_HEADER_LENGTH + faces.len();
        }
        BvhNode::Internal {
            position,
            left,
            right,
            ..
        } => {
            position.set(*cursor);
            *cursor += MESH_NODE_HEADER_LENGTH;
            assign_positions(left, cursor);
            assign_positions(right, cursor);
        }
    }
}

/// Second pass: emit nodes depth-first. `next` is where traversal resumes
/// when this subtree is done or its box is missed; 0 terminates.
fn serialize_bvh(
    node: &BvhNode,
    next: usize,
    stream: &mut Vec<f32>,
    aabbs: &mut Vec<f32>,
    faces: &[MeshFace],
) {
    match node {
        BvhNode::Leaf {
            faces: members, ..
        } => {
            let minimum = members
                .iter()
                .map(|&i| faces[i].minimum)
                .fold(Vec3::MAX, Vec3::min);
            let maximum = members
                .iter()
                .map(|&i| faces[i].maximum)
                .fold(Vec3::MIN, Vec3::max);
            let bv_offset = aabbs.len();
            aabbs.extend_from_slice(&minimum.to_array());
            aabbs.extend_from_slice(&maximum.to_array());

            stream.push(MESH_NODE_LEAF);
            stream.push(bv_offset as f32);
            stream.push(next as f32);
            stream.push(members.len() as f32);
            for &face in members {
                stream.push(faces[face].triangle_offset as f32);
            }
        }
        BvhNode::Internal {
            minimum,
            maximum,
            left,
            right,
            ..
        } => {
            let bv_offset = aabbs.len();
            aabbs.extend_from_slice(&minimum.to_array());
            aabbs.extend_from_slice(&maximum.to_array());

            let left_position = bvh_position(left);
            let right_position = bvh_position(right);
            stream.push(MESH_NODE_INTERNAL);
            stream.push(bv_offset as f32);
            stream.push(next as f32);
            stream.push(left_position as f32);
            serialize_bvh(left, right_position, stream, aabbs, faces);
            serialize_bvh(right, next, stream, aabbs, faces);
        }
    }
}

fn bvh_position(node: &BvhNode) -> usize {
    match node {
        BvhNode::Leaf { position, .. } => position.get(),
        BvhNode::Internal { position, .. } => position.get(),
    }
}

// --- Preetham sky parameters ----------------------------------------------

/// Zenith color (Y in kcd/m^2, then CIE x and y) and the three Perez
/// coefficient sets for a given turbidity and sun angle from zenith.
fn preetham_parameters(
    turbidity: f32,
    theta_sun: f32,
) -> (Vec3, [f32; 5], [f32; 5], [f32; 5]) {
    let t = turbidity;
    let coefficients_y = [
        0.1787 * t - 1.4630,
        -0.3554 * t + 0.4275,
        -0.0227 * t + 5.3251,
        0.1206 * t - 2.5771,
        -0.0670 * t + 0.3703,
    ];
    let coefficients_x = [
        -0.0193 * t - 0.2592,
        -0.0665 * t + 0.0008,
        -0.0004 * t + 0.2125,
        -0.0641 * t - 0.8989,
        -0.0033 * t + 0.0452,
    ];
    let coefficients_yy = [
        -0.0167 * t - 0.2608,
        -0.0950 * t + 0.0092,
        -0.0079 * t + 0.2102,
        -0.0441 * t - 1.6537,
        -0.0109 * t + 0.0529,
    ];

    let chi = (4.0 / 9.0 - t / 120.0) * (core::f32::consts::PI - 2.0 * theta_sun);
    let zenith_luminance = ((4.0453 * t - 4.9710) * chi.tan() - 0.2155 * t + 2.4192).max(0.0);

    let theta = theta_sun;
    let theta2 = theta * theta;
    let theta3 = theta2 * theta;
    let t2 = t * t;
    let zenith_x = t2 * (0.00166 * theta3 - 0.00375 * theta2 + 0.00209 * theta)
        + t * (-0.02903 * theta3 + 0.06377 * theta2 - 0.03202 * theta + 0.00394)
        + (0.11693 * theta3 - 0.21196 * theta2 + 0.06052 * theta + 0.25886);
    let zenith_y = t2 * (0.00275 * theta3 - 0.00610 * theta2 + 0.00317 * theta)
        + t * (-0.04214 * theta3 + 0.08970 * theta2 - 0.04153 * theta + 0.00516)
        + (0.15346 * theta3 - 0.26756 * theta2 + 0.06670 * theta + 0.26688);

    (
        Vec3::new(zenith_luminance, zenith_x, zenith_y),
        coefficients_y,
        coefficients_x,
        coefficients_yy,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn built_scene_passes_validation() {
        let mut builder = SceneBuilder::new();
        builder.look_at_camera(
            Vec3::new(0.0, 0.0, -3.0),
            Vec3::ZERO,
            Vec3::Y,
            45f32.to_radians(),
            45f32.to_radians(),
            16,
            16,
        );
        let matte = builder.matte_from_color(Vec3::splat(0.7));
        let sphere = builder.sphere(Vec3::ZERO, 1.0);
        builder.primitive(sphere, matte, Mat4::IDENTITY);
        let plane = builder.plane(
            Vec3::new(0.0, -1.0, 0.0),
            Vec3::new(1.0, -1.0, 0.0),
            Vec3::new(0.0, -1.0, 1.0),
        );
        builder.primitive(plane, matte, Mat4::IDENTITY);
        builder.point_light(Vec3::new(0.0, 5.0, 0.0), Vec3::splat(30.0));
        builder.build().validate().unwrap();
    }

    #[test]
    fn plane_primitive_gets_infinite_bounding_volume() {
        let mut builder = SceneBuilder::new();
        builder.look_at_camera(
            Vec3::new(0.0, 1.0, -3.0),
            Vec3::ZERO,
            Vec3::Y,
            1.0,
            1.0,
            4,
            4,
        );
        let matte = builder.matte_from_color(Vec3::ONE);
        let plane = builder.plane(Vec3::ZERO, Vec3::X, Vec3::Z);
        builder.primitive(plane, matte, Mat4::IDENTITY);
        let tables = builder.build();
        assert_eq!(tables.primitive(0)[PRIMITIVE_BV_KIND], BOUNDING_VOLUME_INFINITE);
    }

    #[test]
    fn mesh_stream_has_terminating_root() {
        let mut builder = SceneBuilder::new();
        // four quads far apart, forcing at least one internal node
        let mut positions = Vec::new();
        let mut indices = Vec::new();
        for base in [
            Vec3::ZERO,
            Vec3::new(10.0, 0.0, 0.0),
            Vec3::new(20.0, 0.0, 0.0),
            Vec3::new(30.0, 0.0, 0.0),
        ] {
            let start = positions.len() as u32;
            positions.extend_from_slice(&[
                base,
                base + Vec3::X,
                base + Vec3::Y,
                base + Vec3::X + Vec3::Y,
            ]);
            indices.push([start, start + 1, start + 2]);
            indices.push([start + 1, start + 3, start + 2]);
        }
        let shape = builder.triangle_mesh(&positions, &indices, None);
        let tables = builder.build();
        let stream = &tables.triangle_meshes;
        let root = shape.offset as usize;
        assert_eq!(stream[root + MESH_NODE_KIND], MESH_NODE_INTERNAL);
        assert_eq!(stream[root + MESH_NODE_NEXT], 0.0);
        // left child immediately follows the root header
        assert_eq!(
            stream[root + MESH_NODE_PAYLOAD],
            MESH_NODE_HEADER_LENGTH as f32
        );
    }

    #[test]
    fn preetham_zenith_is_reasonable_at_midday() {
        let (zenith, ..) = preetham_parameters(3.0, 0.3);
        assert!(zenith.x > 0.0);
        assert!(zenith.y > 0.2 && zenith.y < 0.45);
        assert!(zenith.z > 0.2 && zenith.z < 0.45);
    }

    #[test]
    fn emissive_triangle_registers_light_and_primitive() {
        let mut builder = SceneBuilder::new();
        builder.look_at_camera(Vec3::NEG_Z, Vec3::ZERO, Vec3::Y, 1.0, 1.0, 4, 4);
        let matte = builder.matte_from_color(Vec3::ONE);
        builder.emissive_triangle(
            Vec3::new(-1.0, 2.0, -1.0),
            Vec3::new(1.0, 2.0, -1.0),
            Vec3::new(0.0, 2.0, 1.0),
            Vec3::new(17.0, 12.0, 4.0),
            false,
            matte,
        );
        let tables = builder.build();
        assert_eq!(tables.light_count(), 1);
        assert_eq!(tables.primitive_count(), 1);
        assert_eq!(tables.primitive(0)[PRIMITIVE_AREA_LIGHT_KIND], LIGHT_DIFFUSE_AREA);
        tables.validate().unwrap();
    }
}
