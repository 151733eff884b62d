//! The packed, read-only numeric tables the render kernel indexes.
//!
//! Everything the kernel touches during a pass lives in flat `f32`/`i32`
//! arrays. Entities reference each other through integer offsets, never
//! pointers, and every entity kind has a fixed stride except the two
//! inline-length tables (triangle-mesh BVH streams and LDR images). The
//! scene compiler fills these tables; the kernel only reads them.

use glam::Mat4;
use thiserror::Error;

// Bounding volume kind tags.
pub const BOUNDING_VOLUME_INFINITE: i32 = 1;
pub const BOUNDING_VOLUME_AABB: i32 = 2;
pub const BOUNDING_VOLUME_SPHERE: i32 = 3;

// Shape kind tags.
pub const SHAPE_PLANE: i32 = 1;
pub const SHAPE_SPHERE: i32 = 2;
pub const SHAPE_CUBOID: i32 = 3;
pub const SHAPE_TORUS: i32 = 4;
pub const SHAPE_TRIANGLE: i32 = 5;
pub const SHAPE_TRIANGLE_MESH: i32 = 6;

// Texture kind tags.
pub const TEXTURE_CONSTANT: i32 = 1;
pub const TEXTURE_CHECKERBOARD: i32 = 2;
pub const TEXTURE_BULLSEYE: i32 = 3;
pub const TEXTURE_BLEND: i32 = 4;
pub const TEXTURE_MARBLE: i32 = 5;
pub const TEXTURE_SIMPLEX_FBM: i32 = 6;
pub const TEXTURE_LDR_IMAGE: i32 = 7;
pub const TEXTURE_SURFACE_NORMAL: i32 = 8;
pub const TEXTURE_UV: i32 = 9;
pub const TEXTURE_FUNCTION: i32 = 10;

// Material kind tags.
pub const MATERIAL_MATTE: i32 = 1;
pub const MATERIAL_MIRROR: i32 = 2;
pub const MATERIAL_GLASS: i32 = 3;
pub const MATERIAL_METAL: i32 = 4;
pub const MATERIAL_CLEAR_COAT: i32 = 5;

// Light kind tags. 0 in a primitive row means "not emissive".
pub const LIGHT_NONE: i32 = 0;
pub const LIGHT_POINT: i32 = 1;
pub const LIGHT_SPOT: i32 = 2;
pub const LIGHT_DIRECTIONAL: i32 = 3;
pub const LIGHT_DIFFUSE_AREA: i32 = 4;
pub const LIGHT_LDR_IMAGE: i32 = 5;
pub const LIGHT_PEREZ: i32 = 6;

// Camera lens selector, stored as f32 in the camera array.
pub const LENS_FISHEYE: f32 = 0.0;
pub const LENS_THIN: f32 = 1.0;

// Fixed strides.
pub const AABB_LENGTH: usize = 6;
pub const BOUNDING_SPHERE_LENGTH: usize = 4;
pub const PLANE_LENGTH: usize = 12;
pub const SPHERE_LENGTH: usize = 4;
pub const CUBOID_LENGTH: usize = 6;
pub const TORUS_LENGTH: usize = 2;
pub const TRIANGLE_LENGTH: usize = 33;
pub const MATTE_LENGTH: usize = 4;
pub const MIRROR_LENGTH: usize = 4;
pub const GLASS_LENGTH: usize = 8;
pub const METAL_LENGTH: usize = 6;
pub const CLEAR_COAT_LENGTH: usize = 6;
pub const CONSTANT_LENGTH: usize = 3;
pub const CHECKERBOARD_LENGTH: usize = 7;
pub const BULLSEYE_LENGTH: usize = 8;
pub const BLEND_LENGTH: usize = 7;
pub const MARBLE_LENGTH: usize = 13;
pub const SIMPLEX_FBM_LENGTH: usize = 6;
pub const FUNCTION_LENGTH: usize = 3;
pub const POINT_LIGHT_LENGTH: usize = 6;
pub const SPOT_LIGHT_LENGTH: usize = 11;
pub const DIRECTIONAL_LIGHT_LENGTH: usize = 6;
pub const DIFFUSE_AREA_LIGHT_LENGTH: usize = 14;
pub const PEREZ_LIGHT_LENGTH: usize = 23;

/// Camera array layout: `{fov_x, fov_y, lens, u(3), v(3), w(3), eye(3),
/// aperture_radius, focal_distance, res_x, res_y}`.
pub const CAMERA_LENGTH: usize = 19;
pub const CAMERA_FOV_X: usize = 0;
pub const CAMERA_FOV_Y: usize = 1;
pub const CAMERA_LENS: usize = 2;
pub const CAMERA_U: usize = 3;
pub const CAMERA_V: usize = 6;
pub const CAMERA_W: usize = 9;
pub const CAMERA_EYE: usize = 12;
pub const CAMERA_APERTURE_RADIUS: usize = 15;
pub const CAMERA_FOCAL_DISTANCE: usize = 16;
pub const CAMERA_RESOLUTION_X: usize = 17;
pub const CAMERA_RESOLUTION_Y: usize = 18;

/// Primitive row layout (all i32): `{bv_kind, bv_offset, shape_kind,
/// shape_offset, material_kind, material_offset, area_light_kind,
/// area_light_offset, instance_id}`.
pub const PRIMITIVE_LENGTH: usize = 9;
pub const PRIMITIVE_BV_KIND: usize = 0;
pub const PRIMITIVE_BV_OFFSET: usize = 1;
pub const PRIMITIVE_SHAPE_KIND: usize = 2;
pub const PRIMITIVE_SHAPE_OFFSET: usize = 3;
pub const PRIMITIVE_MATERIAL_KIND: usize = 4;
pub const PRIMITIVE_MATERIAL_OFFSET: usize = 5;
pub const PRIMITIVE_AREA_LIGHT_KIND: usize = 6;
pub const PRIMITIVE_AREA_LIGHT_OFFSET: usize = 7;
pub const PRIMITIVE_INSTANCE_ID: usize = 8;

/// Per-primitive transform pair: object→world then world→object, both
/// row-major 16 floats.
pub const MATRIX_PAIR_LENGTH: usize = 32;

/// Triangle-mesh BVH node header: `{node_kind, bv_offset (into the AABB
/// table), next_sibling_offset, left_child_or_tri_count}`. Leaf nodes are
/// followed by `tri_count` triangle offsets. A `next_sibling_offset` of 0
/// terminates traversal; the root stores 0.
pub const MESH_NODE_INTERNAL: f32 = 1.0;
pub const MESH_NODE_LEAF: f32 = 2.0;
pub const MESH_NODE_KIND: usize = 0;
pub const MESH_NODE_BV_OFFSET: usize = 1;
pub const MESH_NODE_NEXT: usize = 2;
pub const MESH_NODE_PAYLOAD: usize = 3;
pub const MESH_NODE_HEADER_LENGTH: usize = 4;

/// LDR image header: `{angle, scale_u, scale_v, res_x, res_y, data_len}`
/// followed by `data_len` packed-RGB pixels. Shared by the LDR texture and
/// the LDR environment light.
pub const LDR_IMAGE_HEADER_LENGTH: usize = 6;
pub const LDR_IMAGE_ANGLE: usize = 0;
pub const LDR_IMAGE_SCALE_U: usize = 1;
pub const LDR_IMAGE_SCALE_V: usize = 2;
pub const LDR_IMAGE_RESOLUTION_X: usize = 3;
pub const LDR_IMAGE_RESOLUTION_Y: usize = 4;
pub const LDR_IMAGE_DATA_LENGTH: usize = 5;

/// Payload stride of a material kind, 0 for unknown tags.
pub fn material_stride(kind: i32) -> usize {
    match kind {
        MATERIAL_MATTE => MATTE_LENGTH,
        MATERIAL_MIRROR => MIRROR_LENGTH,
        MATERIAL_GLASS => GLASS_LENGTH,
        MATERIAL_METAL => METAL_LENGTH,
        MATERIAL_CLEAR_COAT => CLEAR_COAT_LENGTH,
        _ => 0,
    }
}

/// Payload stride of a texture kind; the inline-length LDR image counts
/// only its header, payload-free kinds count zero.
pub fn texture_stride(kind: i32) -> usize {
    match kind {
        TEXTURE_CONSTANT => CONSTANT_LENGTH,
        TEXTURE_CHECKERBOARD => CHECKERBOARD_LENGTH,
        TEXTURE_BULLSEYE => BULLSEYE_LENGTH,
        TEXTURE_BLEND => BLEND_LENGTH,
        TEXTURE_MARBLE => MARBLE_LENGTH,
        TEXTURE_SIMPLEX_FBM => SIMPLEX_FBM_LENGTH,
        TEXTURE_LDR_IMAGE => LDR_IMAGE_HEADER_LENGTH,
        TEXTURE_FUNCTION => FUNCTION_LENGTH,
        _ => 0,
    }
}

/// Payload stride of a light kind; the inline-length LDR image counts only
/// its header.
pub fn light_stride(kind: i32) -> usize {
    match kind {
        LIGHT_POINT => POINT_LIGHT_LENGTH,
        LIGHT_SPOT => SPOT_LIGHT_LENGTH,
        LIGHT_DIRECTIONAL => DIRECTIONAL_LIGHT_LENGTH,
        LIGHT_DIFFUSE_AREA => DIFFUSE_AREA_LIGHT_LENGTH,
        LIGHT_LDR_IMAGE => LDR_IMAGE_HEADER_LENGTH,
        LIGHT_PEREZ => PEREZ_LIGHT_LENGTH,
        _ => 0,
    }
}

/// Pack an 8-bit RGB triple into a single f32. A 24-bit integer is exactly
/// representable in an f32 mantissa, so the round trip is lossless.
pub fn pack_rgb(r: u8, g: u8, b: u8) -> f32 {
    (((r as u32) << 16) | ((g as u32) << 8) | b as u32) as f32
}

/// Unpack a packed-RGB pixel into normalized [0,1] channels.
pub fn unpack_rgb(pixel: f32) -> (f32, f32, f32) {
    let bits = pixel as u32;
    (
        ((bits >> 16) & 0xff) as f32 / 255.0,
        ((bits >> 8) & 0xff) as f32 / 255.0,
        (bits & 0xff) as f32 / 255.0,
    )
}

/// Every numeric table a render pass reads. Built once by the scene
/// compiler, immutable for the duration of a pass.
#[derive(Clone, Debug, Default)]
pub struct SceneTables {
    // Bounding volumes, world space.
    pub aabbs: Vec<f32>,
    pub bounding_spheres: Vec<f32>,

    // Shapes, object space.
    pub planes: Vec<f32>,
    pub spheres: Vec<f32>,
    pub cuboids: Vec<f32>,
    pub toruses: Vec<f32>,
    pub triangles: Vec<f32>,
    pub triangle_meshes: Vec<f32>,

    // Textures.
    pub textures_constant: Vec<f32>,
    pub textures_checkerboard: Vec<f32>,
    pub textures_bullseye: Vec<f32>,
    pub textures_blend: Vec<f32>,
    pub textures_marble: Vec<f32>,
    pub textures_simplex_fbm: Vec<f32>,
    pub textures_ldr_image: Vec<f32>,
    pub textures_function: Vec<f32>,

    // Materials.
    pub materials_matte: Vec<f32>,
    pub materials_mirror: Vec<f32>,
    pub materials_glass: Vec<f32>,
    pub materials_metal: Vec<f32>,
    pub materials_clear_coat: Vec<f32>,

    // Lights, plus the live-light enumeration as (kind, offset) pairs.
    pub lights_point: Vec<f32>,
    pub lights_spot: Vec<f32>,
    pub lights_directional: Vec<f32>,
    pub lights_diffuse_area: Vec<f32>,
    pub lights_ldr_image: Vec<f32>,
    pub lights_perez: Vec<f32>,
    pub light_enumeration: Vec<i32>,

    // Primitives and their transform pairs.
    pub primitives: Vec<i32>,
    pub matrices: Vec<f32>,

    pub camera: [f32; CAMERA_LENGTH],
}

impl SceneTables {
    pub fn primitive_count(&self) -> usize {
        self.primitives.len() / PRIMITIVE_LENGTH
    }

    pub fn light_count(&self) -> usize {
        self.light_enumeration.len() / 2
    }

    /// The `index`-th primitive row.
    pub fn primitive(&self, index: usize) -> &[i32] {
        &self.primitives[index * PRIMITIVE_LENGTH..(index + 1) * PRIMITIVE_LENGTH]
    }

    /// The (kind, offset) pair of the `index`-th live light.
    pub fn light_at(&self, index: usize) -> (i32, i32) {
        (
            self.light_enumeration[index * 2],
            self.light_enumeration[index * 2 + 1],
        )
    }

    pub fn resolution(&self) -> (u32, u32) {
        (
            self.camera[CAMERA_RESOLUTION_X].max(0.0) as u32,
            self.camera[CAMERA_RESOLUTION_Y].max(0.0) as u32,
        )
    }

    /// The payload table for a texture kind. Kinds with no payload
    /// (SurfaceNormal, Uv) map to an empty slice.
    pub fn texture_table(&self, kind: i32) -> &[f32] {
        match kind {
            TEXTURE_CONSTANT => &self.textures_constant,
            TEXTURE_CHECKERBOARD => &self.textures_checkerboard,
            TEXTURE_BULLSEYE => &self.textures_bullseye,
            TEXTURE_BLEND => &self.textures_blend,
            TEXTURE_MARBLE => &self.textures_marble,
            TEXTURE_SIMPLEX_FBM => &self.textures_simplex_fbm,
            TEXTURE_LDR_IMAGE => &self.textures_ldr_image,
            TEXTURE_FUNCTION => &self.textures_function,
            _ => &[],
        }
    }

    /// The payload table for a material kind.
    pub fn material_table(&self, kind: i32) -> &[f32] {
        match kind {
            MATERIAL_MATTE => &self.materials_matte,
            MATERIAL_MIRROR => &self.materials_mirror,
            MATERIAL_GLASS => &self.materials_glass,
            MATERIAL_METAL => &self.materials_metal,
            MATERIAL_CLEAR_COAT => &self.materials_clear_coat,
            _ => &[],
        }
    }

    /// The payload table for a light kind.
    pub fn light_table(&self, kind: i32) -> &[f32] {
        match kind {
            LIGHT_POINT => &self.lights_point,
            LIGHT_SPOT => &self.lights_spot,
            LIGHT_DIRECTIONAL => &self.lights_directional,
            LIGHT_DIFFUSE_AREA => &self.lights_diffuse_area,
            LIGHT_LDR_IMAGE => &self.lights_ldr_image,
            LIGHT_PEREZ => &self.lights_perez,
            _ => &[],
        }
    }

    /// The per-primitive matrix pair (object→world, world→object).
    pub fn matrix_pair(&self, primitive_index: usize) -> (Mat4, Mat4) {
        let base = primitive_index * MATRIX_PAIR_LENGTH;
        let object_to_world =
            Mat4::from_cols_array(&slice_16(&self.matrices, base)).transpose();
        let world_to_object =
            Mat4::from_cols_array(&slice_16(&self.matrices, base + 16)).transpose();
        (object_to_world, world_to_object)
    }

    /// Setup-time validation: offsets in bounds, strides consistent,
    /// matrix pairs mutually inverse. Runs once per pass, never inside the
    /// kernel.
    pub fn validate(&self) -> Result<(), SceneError> {
        if self.primitives.len() % PRIMITIVE_LENGTH != 0 {
            return Err(SceneError::TableStride { table: "primitives" });
        }
        if self.light_enumeration.len() % 2 != 0 {
            return Err(SceneError::TableStride {
                table: "light_enumeration",
            });
        }
        let (res_x, res_y) = self.resolution();
        if res_x == 0 || res_y == 0 {
            return Err(SceneError::EmptyResolution);
        }
        let primitive_count = self.primitive_count();
        if self.matrices.len() != primitive_count * MATRIX_PAIR_LENGTH {
            return Err(SceneError::TableStride { table: "matrices" });
        }

        for i in 0..primitive_count {
            let row = &self.primitives[i * PRIMITIVE_LENGTH..(i + 1) * PRIMITIVE_LENGTH];
            self.check_bounding_volume(i, row[PRIMITIVE_BV_KIND], row[PRIMITIVE_BV_OFFSET])?;
            self.check_shape(i, row[PRIMITIVE_SHAPE_KIND], row[PRIMITIVE_SHAPE_OFFSET])?;
            self.check_material(i, row[PRIMITIVE_MATERIAL_KIND], row[PRIMITIVE_MATERIAL_OFFSET])?;
            if row[PRIMITIVE_AREA_LIGHT_KIND] != LIGHT_NONE {
                let kind = row[PRIMITIVE_AREA_LIGHT_KIND];
                check_offset(
                    self.light_table(kind),
                    row[PRIMITIVE_AREA_LIGHT_OFFSET],
                    light_stride(kind).max(1),
                    "area lights",
                    i,
                )?;
            }
            self.check_matrix_pair(i)?;
        }

        for l in 0..self.light_count() {
            let (kind, offset) = self.light_at(l);
            if light_stride(kind) == 0 {
                return Err(SceneError::UnknownKind {
                    table: "lights",
                    kind,
                });
            }
            check_offset(self.light_table(kind), offset, light_stride(kind), "lights", l)?;
        }
        Ok(())
    }

    /// The material's own offset, plus one level of its texture references:
    /// every `(kind, offset)` pair it stores must land inside the matching
    /// texture table.
    fn check_material(&self, index: usize, kind: i32, offset: i32) -> Result<(), SceneError> {
        let stride = material_stride(kind);
        if stride == 0 {
            return Err(SceneError::UnknownKind {
                table: "materials",
                kind,
            });
        }
        let table = self.material_table(kind);
        check_offset(table, offset, stride, "materials", index)?;
        for slot in 0..stride / 2 {
            let texture_kind = table[offset as usize + slot * 2] as i32;
            let texture_offset = table[offset as usize + slot * 2 + 1] as i32;
            check_offset(
                self.texture_table(texture_kind),
                texture_offset,
                texture_stride(texture_kind),
                "textures",
                index,
            )?;
        }
        Ok(())
    }

    fn check_bounding_volume(&self, index: usize, kind: i32, offset: i32) -> Result<(), SceneError> {
        match kind {
            BOUNDING_VOLUME_INFINITE => Ok(()),
            BOUNDING_VOLUME_AABB => check_offset(&self.aabbs, offset, AABB_LENGTH, "aabbs", index),
            BOUNDING_VOLUME_SPHERE => check_offset(
                &self.bounding_spheres,
                offset,
                BOUNDING_SPHERE_LENGTH,
                "bounding_spheres",
                index,
            ),
            _ => Err(SceneError::UnknownKind {
                table: "bounding volumes",
                kind,
            }),
        }
    }

    fn check_shape(&self, index: usize, kind: i32, offset: i32) -> Result<(), SceneError> {
        match kind {
            SHAPE_PLANE => check_offset(&self.planes, offset, PLANE_LENGTH, "planes", index),
            SHAPE_SPHERE => check_offset(&self.spheres, offset, SPHERE_LENGTH, "spheres", index),
            SHAPE_CUBOID => check_offset(&self.cuboids, offset, CUBOID_LENGTH, "cuboids", index),
            SHAPE_TORUS => check_offset(&self.toruses, offset, TORUS_LENGTH, "toruses", index),
            SHAPE_TRIANGLE => {
                check_offset(&self.triangles, offset, TRIANGLE_LENGTH, "triangles", index)
            }
            SHAPE_TRIANGLE_MESH => check_offset(
                &self.triangle_meshes,
                offset,
                MESH_NODE_HEADER_LENGTH,
                "triangle_meshes",
                index,
            ),
            _ => Err(SceneError::UnknownKind {
                table: "shapes",
                kind,
            }),
        }
    }

    fn check_matrix_pair(&self, index: usize) -> Result<(), SceneError> {
        let (object_to_world, world_to_object) = self.matrix_pair(index);
        let product = object_to_world * world_to_object;
        let identity = Mat4::IDENTITY;
        for (a, b) in product
            .to_cols_array()
            .iter()
            .zip(identity.to_cols_array().iter())
        {
            if (a - b).abs() > 1e-4 {
                return Err(SceneError::MatrixPair { index });
            }
        }
        Ok(())
    }
}

fn slice_16(table: &[f32], base: usize) -> [f32; 16] {
    let mut out = [0.0; 16];
    out.copy_from_slice(&table[base..base + 16]);
    out
}

fn check_offset(
    table: &[f32],
    offset: i32,
    length: usize,
    name: &'static str,
    index: usize,
) -> Result<(), SceneError> {
    if offset < 0 || offset as usize + length > table.len() {
        Err(SceneError::OffsetOutOfBounds {
            table: name,
            index,
            offset,
        })
    } else {
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum SceneError {
    #[error("table `{table}` length is not a multiple of its stride")]
    TableStride { table: &'static str },
    #[error("entry {index} of `{table}` has out-of-bounds offset {offset}")]
    OffsetOutOfBounds {
        table: &'static str,
        index: usize,
        offset: i32,
    },
    #[error("unknown kind tag {kind} in `{table}`")]
    UnknownKind { table: &'static str, kind: i32 },
    #[error("matrix pair of primitive {index} is not mutually inverse")]
    MatrixPair { index: usize },
    #[error("camera resolution is zero")]
    EmptyResolution,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_rgb_round_trips() {
        for value in [0u32, 1, 0x7f7f7f, 0xffffff, 0x123456] {
            let r = ((value >> 16) & 0xff) as u8;
            let g = ((value >> 8) & 0xff) as u8;
            let b = (value & 0xff) as u8;
            let packed = pack_rgb(r, g, b);
            let (ur, ug, ub) = unpack_rgb(packed);
            assert_eq!((ur * 255.0).round() as u8, r);
            assert_eq!((ug * 255.0).round() as u8, g);
            assert_eq!((ub * 255.0).round() as u8, b);
        }
    }

    #[test]
    fn empty_scene_fails_validation() {
        let tables = SceneTables::default();
        assert!(matches!(
            tables.validate(),
            Err(SceneError::EmptyResolution)
        ));
    }
}
