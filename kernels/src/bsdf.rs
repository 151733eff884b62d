//! BSDF evaluation in shade space: W is the shading normal, U and V span
//! the tangent plane. Directions point away from the surface. Sampling
//! returns the full record the integrator needs; delta lobes are marked
//! specular and excluded from light-sampling MIS.

use core::f32::consts::PI;

use glam::{Vec2, Vec3, Vec3Swizzles};
use scene_tables::SceneTables;

use crate::intersect::Intersection;
use crate::rng::RngState;
use crate::sampling::{
    cosine_sample_hemisphere, fresnel_dielectric, fresnel_schlick, power_cosine_sample_hemisphere,
    OrthonormalBasis,
};
use crate::texture::evaluate_texture;

#[derive(Clone, Copy, Debug)]
pub struct BsdfSample {
    /// World-space sampled incoming direction, away from the surface.
    pub incoming: Vec3,
    pub pdf: f32,
    /// BSDF value f; the integrator applies |cos| / pdf.
    pub result: Vec3,
    pub specular: bool,
    pub transmission: bool,
    /// Reciprocal of the radiance scale embedded in f by a specular
    /// transmission, so beta * eta_scale stays scale-free for roulette.
    pub eta_scale: f32,
}

/// A material's scattering state at one shading point: every lobe's
/// reflectance already looked up from its textures.
pub struct Bsdf {
    kind: i32,
    shading: OrthonormalBasis,
    pub emission: Vec3,
    diffuse: Vec3,
    reflectance: Vec3,
    transmittance: Vec3,
    eta: f32,
    exponent: f32,
}

fn texture_ref(table: &[f32], offset: usize, slot: usize) -> (i32, i32) {
    (
        table[offset + slot * 2] as i32,
        table[offset + slot * 2 + 1] as i32,
    )
}

/// Look up the material of a hit and evaluate its textures at the shading
/// point. Unknown material kinds produce an all-black BSDF.
pub fn evaluate_material(
    tables: &SceneTables,
    material_kind: i32,
    material_offset: i32,
    hit: &Intersection,
) -> Bsdf {
    let table = tables.material_table(material_kind);
    let offset = material_offset as usize;
    let lookup = |slot: usize| -> Vec3 {
        let (kind, texture_offset) = texture_ref(table, offset, slot);
        evaluate_texture(
            tables,
            kind,
            texture_offset,
            hit.point,
            hit.shading.w,
            hit.uv,
        )
    };

    let mut bsdf = Bsdf {
        kind: material_kind,
        shading: hit.shading,
        emission: Vec3::ZERO,
        diffuse: Vec3::ZERO,
        reflectance: Vec3::ZERO,
        transmittance: Vec3::ZERO,
        eta: 1.5,
        exponent: 1.0,
    };
    if table.is_empty() {
        return bsdf;
    }
    bsdf.emission = lookup(0);
    match material_kind {
        scene_tables::MATERIAL_MATTE => {
            bsdf.diffuse = lookup(1);
        }
        scene_tables::MATERIAL_MIRROR => {
            bsdf.reflectance = lookup(1);
        }
        scene_tables::MATERIAL_GLASS => {
            bsdf.reflectance = lookup(1);
            bsdf.transmittance = lookup(2);
            bsdf.eta = lookup(3).x.max(1.0 + 1e-3);
        }
        scene_tables::MATERIAL_METAL => {
            bsdf.reflectance = lookup(1);
            bsdf.exponent = lookup(2).x.max(1.0);
        }
        scene_tables::MATERIAL_CLEAR_COAT => {
            bsdf.diffuse = lookup(1);
            bsdf.reflectance = lookup(2);
        }
        _ => {}
    }
    bsdf
}

impl Bsdf {
    /// A representative surface color for the debug ray-casting mode.
    pub fn albedo(&self) -> Vec3 {
        self.diffuse + self.reflectance + self.transmittance
    }

    /// True when at least one lobe is not a delta distribution; only then
    /// is direct light sampling worthwhile.
    pub fn has_non_specular_lobe(&self) -> bool {
        matches!(
            self.kind,
            scene_tables::MATERIAL_MATTE
                | scene_tables::MATERIAL_METAL
                | scene_tables::MATERIAL_CLEAR_COAT
        )
    }

    /// Sample an incoming direction for the given world-space outgoing
    /// direction. `None` means the sampled lobe vanished (below-horizon
    /// half vector, zero pdf); the path ends there.
    pub fn sample(&self, outgoing_world: Vec3, rng: &mut RngState) -> Option<BsdfSample> {
        let outgoing = self.shading.to_local(outgoing_world);
        if outgoing.z == 0.0 {
            return None;
        }
        let sample = rng.gen_r3();
        let local = match self.kind {
            scene_tables::MATERIAL_MATTE => self.sample_lambertian(outgoing, sample.xy()),
            scene_tables::MATERIAL_MIRROR => self.sample_mirror(outgoing),
            scene_tables::MATERIAL_GLASS => self.sample_glass(outgoing, sample.z),
            scene_tables::MATERIAL_METAL => self.sample_phong(outgoing, sample.xy()),
            scene_tables::MATERIAL_CLEAR_COAT => self.sample_clear_coat(outgoing, sample),
            _ => None,
        };
        local.map(|mut s| {
            s.incoming = self.shading.to_world(s.incoming).normalize();
            s
        })
    }

    /// f for a non-delta lobe pair of world-space directions; black for
    /// delta materials.
    pub fn evaluate(&self, outgoing_world: Vec3, incoming_world: Vec3) -> Vec3 {
        let outgoing = self.shading.to_local(outgoing_world);
        let incoming = self.shading.to_local(incoming_world);
        if outgoing.z * incoming.z <= 0.0 {
            return Vec3::ZERO;
        }
        match self.kind {
            scene_tables::MATERIAL_MATTE => self.diffuse / PI,
            scene_tables::MATERIAL_METAL => self.phong_f(outgoing, incoming),
            scene_tables::MATERIAL_CLEAR_COAT => {
                let fresnel = fresnel_dielectric(outgoing.z.abs(), 1.0, 1.5);
                self.diffuse * (1.0 - fresnel) / PI
            }
            _ => Vec3::ZERO,
        }
    }

    /// pdf of the non-delta lobes for MIS weighting; 0 for delta materials.
    pub fn pdf(&self, outgoing_world: Vec3, incoming_world: Vec3) -> f32 {
        let outgoing = self.shading.to_local(outgoing_world);
        let incoming = self.shading.to_local(incoming_world);
        if outgoing.z * incoming.z <= 0.0 {
            return 0.0;
        }
        match self.kind {
            scene_tables::MATERIAL_MATTE => incoming.z.abs() / PI,
            scene_tables::MATERIAL_METAL => self.phong_pdf(outgoing, incoming),
            scene_tables::MATERIAL_CLEAR_COAT => {
                let fresnel = fresnel_dielectric(outgoing.z.abs(), 1.0, 1.5);
                let specular_probability = 0.25 + 0.5 * fresnel;
                (1.0 - specular_probability) * incoming.z.abs() / PI
            }
            _ => 0.0,
        }
    }

    fn sample_lambertian(&self, outgoing: Vec3, sample: Vec2) -> Option<BsdfSample> {
        let mut incoming = cosine_sample_hemisphere(sample.x, sample.y);
        if outgoing.z < 0.0 {
            incoming.z = -incoming.z;
        }
        let pdf = incoming.z.abs() / PI;
        if pdf <= 0.0 {
            return None;
        }
        Some(BsdfSample {
            incoming,
            pdf,
            result: self.diffuse / PI,
            specular: false,
            transmission: false,
            eta_scale: 1.0,
        })
    }

    fn sample_mirror(&self, outgoing: Vec3) -> Option<BsdfSample> {
        let incoming = Vec3::new(-outgoing.x, -outgoing.y, outgoing.z);
        if incoming.z == 0.0 {
            return None;
        }
        Some(BsdfSample {
            incoming,
            pdf: 1.0,
            result: self.reflectance / incoming.z.abs(),
            specular: true,
            transmission: false,
            eta_scale: 1.0,
        })
    }

    fn sample_glass(&self, outgoing: Vec3, lobe_choice: f32) -> Option<BsdfSample> {
        let entering = outgoing.z > 0.0;
        let (eta_i, eta_t) = if entering {
            (1.0, self.eta)
        } else {
            (self.eta, 1.0)
        };
        let fresnel = fresnel_dielectric(outgoing.z.abs(), eta_i, eta_t);

        let reflection = |pdf: f32, weight: f32| -> BsdfSample {
            let incoming = Vec3::new(-outgoing.x, -outgoing.y, outgoing.z);
            BsdfSample {
                incoming,
                pdf,
                result: self.reflectance * weight / incoming.z.abs(),
                specular: true,
                transmission: false,
                eta_scale: 1.0,
            }
        };

        if lobe_choice < fresnel {
            return Some(reflection(fresnel, fresnel));
        }

        let normal = if entering { Vec3::Z } else { -Vec3::Z };
        match crate::sampling::refract(-outgoing, normal, eta_i / eta_t) {
            None => Some(reflection(1.0, 1.0)),
            Some(incoming) => {
                let incoming = incoming.normalize();
                if incoming.z == 0.0 {
                    return None;
                }
                let scale = (eta_t / eta_i) * (eta_t / eta_i);
                Some(BsdfSample {
                    incoming,
                    pdf: 1.0 - fresnel,
                    result: self.transmittance * (1.0 - fresnel) * scale / incoming.z.abs(),
                    specular: true,
                    transmission: true,
                    eta_scale: 1.0 / scale,
                })
            }
        }
    }

    fn phong_half_vector(&self, outgoing: Vec3, incoming: Vec3) -> Vec3 {
        let half = (outgoing + incoming).normalize_or_zero();
        if half.z < 0.0 {
            -half
        } else {
            half
        }
    }

    fn phong_f(&self, outgoing: Vec3, incoming: Vec3) -> Vec3 {
        let half = self.phong_half_vector(outgoing, incoming);
        if half == Vec3::ZERO {
            return Vec3::ZERO;
        }
        let cos_o = outgoing.z.abs();
        let cos_i = incoming.z.abs();
        let o_dot_h = outgoing.dot(half).abs();
        if cos_o == 0.0 || cos_i == 0.0 || o_dot_h == 0.0 {
            return Vec3::ZERO;
        }
        let distribution = (self.exponent + 2.0) / (2.0 * PI) * half.z.abs().powf(self.exponent);
        let geometry = 1.0f32
            .min(2.0 * half.z.abs() * cos_o / o_dot_h)
            .min(2.0 * half.z.abs() * cos_i / o_dot_h);
        let fresnel = fresnel_schlick(o_dot_h, self.reflectance);
        fresnel * distribution * geometry / (4.0 * cos_o * cos_i)
    }

    fn phong_pdf(&self, outgoing: Vec3, incoming: Vec3) -> f32 {
        let half = self.phong_half_vector(outgoing, incoming);
        if half == Vec3::ZERO {
            return 0.0;
        }
        let o_dot_h = outgoing.dot(half).abs();
        if o_dot_h == 0.0 {
            return 0.0;
        }
        (self.exponent + 1.0) * half.z.abs().powf(self.exponent)
            / (2.0 * PI * 4.0 * o_dot_h)
    }

    fn sample_phong(&self, outgoing: Vec3, sample: Vec2) -> Option<BsdfSample> {
        let mut half = power_cosine_sample_hemisphere(sample.x, sample.y, self.exponent);
        if outgoing.z < 0.0 {
            half.z = -half.z;
        }
        let incoming = crate::sampling::reflect(-outgoing, half);
        if incoming.z * outgoing.z <= 0.0 {
            return None;
        }
        let pdf = self.phong_pdf(outgoing, incoming);
        if pdf <= 0.0 || !pdf.is_finite() {
            return None;
        }
        Some(BsdfSample {
            incoming,
            pdf,
            result: self.phong_f(outgoing, incoming),
            specular: false,
            transmission: false,
            eta_scale: 1.0,
        })
    }

    fn sample_clear_coat(&self, outgoing: Vec3, sample: Vec3) -> Option<BsdfSample> {
        let fresnel = fresnel_dielectric(outgoing.z.abs(), 1.0, 1.5);
        let specular_probability = 0.25 + 0.5 * fresnel;
        if sample.z < specular_probability {
            let incoming = Vec3::new(-outgoing.x, -outgoing.y, outgoing.z);
            if incoming.z == 0.0 {
                return None;
            }
            Some(BsdfSample {
                incoming,
                pdf: specular_probability,
                result: self.reflectance * fresnel / incoming.z.abs(),
                specular: true,
                transmission: false,
                eta_scale: 1.0,
            })
        } else {
            let mut incoming = cosine_sample_hemisphere(sample.x, sample.y);
            if outgoing.z < 0.0 {
                incoming.z = -incoming.z;
            }
            let pdf = (1.0 - specular_probability) * incoming.z.abs() / PI;
            if pdf <= 0.0 {
                return None;
            }
            Some(BsdfSample {
                incoming,
                pdf,
                result: self.diffuse * (1.0 - fresnel) / PI,
                specular: false,
                transmission: false,
                eta_scale: 1.0,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn flat_hit() -> Intersection {
        Intersection::default()
    }

    fn matte_tables(albedo: [f32; 3]) -> SceneTables {
        let mut tables = SceneTables::default();
        tables.textures_constant.extend_from_slice(&[0.0, 0.0, 0.0]);
        tables.textures_constant.extend_from_slice(&albedo);
        tables.materials_matte.extend_from_slice(&[
            scene_tables::TEXTURE_CONSTANT as f32,
            0.0,
            scene_tables::TEXTURE_CONSTANT as f32,
            3.0,
        ]);
        tables
    }

    #[test]
    fn matte_samples_outgoing_hemisphere() {
        let tables = matte_tables([0.5, 0.5, 0.5]);
        let hit = flat_hit();
        let bsdf = evaluate_material(&tables, scene_tables::MATERIAL_MATTE, 0, &hit);
        let mut rng = RngState::new(1, 1);
        for _ in 0..128 {
            let sample = bsdf.sample(Vec3::new(0.3, 0.1, 0.95).normalize(), &mut rng).unwrap();
            assert!(sample.incoming.z > 0.0);
            assert!(!sample.specular);
            assert_relative_eq!(sample.pdf, sample.incoming.z / PI, epsilon = 1e-4);
            assert_relative_eq!(sample.result.x, 0.5 / PI, epsilon = 1e-5);
        }
    }

    #[test]
    fn matte_evaluate_rejects_lower_hemisphere() {
        let tables = matte_tables([0.8, 0.8, 0.8]);
        let bsdf = evaluate_material(&tables, scene_tables::MATERIAL_MATTE, 0, &flat_hit());
        let f = bsdf.evaluate(Vec3::Z, Vec3::new(0.0, 0.0, -1.0));
        assert_eq!(f, Vec3::ZERO);
        assert_eq!(bsdf.pdf(Vec3::Z, Vec3::new(0.0, 0.0, -1.0)), 0.0);
    }

    fn mirror_tables() -> SceneTables {
        let mut tables = SceneTables::default();
        tables.textures_constant.extend_from_slice(&[0.0, 0.0, 0.0]);
        tables.textures_constant.extend_from_slice(&[1.0, 1.0, 1.0]);
        tables.materials_mirror.extend_from_slice(&[
            scene_tables::TEXTURE_CONSTANT as f32,
            0.0,
            scene_tables::TEXTURE_CONSTANT as f32,
            3.0,
        ]);
        tables
    }

    #[test]
    fn mirror_reflects_about_normal() {
        let tables = mirror_tables();
        let bsdf = evaluate_material(&tables, scene_tables::MATERIAL_MIRROR, 0, &flat_hit());
        let outgoing = Vec3::new(0.5, 0.0, 0.5f32.sqrt()).normalize();
        let mut rng = RngState::new(3, 3);
        let sample = bsdf.sample(outgoing, &mut rng).unwrap();
        assert!(sample.specular);
        assert_relative_eq!(sample.pdf, 1.0);
        assert_relative_eq!(sample.incoming.x, -outgoing.x, epsilon = 1e-5);
        assert_relative_eq!(sample.incoming.z, outgoing.z, epsilon = 1e-5);
    }

    fn glass_tables(eta: f32) -> SceneTables {
        let mut tables = SceneTables::default();
        tables.textures_constant.extend_from_slice(&[0.0, 0.0, 0.0]);
        tables.textures_constant.extend_from_slice(&[1.0, 1.0, 1.0]);
        tables
            .textures_constant
            .extend_from_slice(&[eta, eta, eta]);
        tables.materials_glass.extend_from_slice(&[
            scene_tables::TEXTURE_CONSTANT as f32,
            0.0,
            scene_tables::TEXTURE_CONSTANT as f32,
            3.0,
            scene_tables::TEXTURE_CONSTANT as f32,
            3.0,
            scene_tables::TEXTURE_CONSTANT as f32,
            6.0,
        ]);
        tables
    }

    #[test]
    fn glass_refracts_at_normal_incidence() {
        let tables = glass_tables(1.5);
        let bsdf = evaluate_material(&tables, scene_tables::MATERIAL_GLASS, 0, &flat_hit());
        // lobe choice just above the ~4% reflectance picks transmission
        let sample = bsdf.sample_glass(Vec3::Z, 0.9).unwrap();
        assert!(sample.transmission);
        assert_relative_eq!(sample.incoming.z, -1.0, epsilon = 1e-4);
        assert!(sample.eta_scale < 1.0);
    }

    #[test]
    fn glass_collapses_to_reflection_on_tir() {
        let tables = glass_tables(1.5);
        let bsdf = evaluate_material(&tables, scene_tables::MATERIAL_GLASS, 0, &flat_hit());
        // leaving the glass at a grazing angle, beyond the critical angle
        let outgoing = Vec3::new(0.9, 0.0, -(1.0f32 - 0.81).sqrt()).normalize();
        let sample = bsdf.sample_glass(outgoing, 0.999).unwrap();
        assert!(!sample.transmission);
        assert_relative_eq!(sample.incoming.z, outgoing.z, epsilon = 1e-5);
    }

    #[test]
    fn clear_coat_picks_both_lobes() {
        let mut tables = SceneTables::default();
        tables.textures_constant.extend_from_slice(&[0.0, 0.0, 0.0]);
        tables.textures_constant.extend_from_slice(&[0.7, 0.2, 0.2]);
        tables.textures_constant.extend_from_slice(&[1.0, 1.0, 1.0]);
        tables.materials_clear_coat.extend_from_slice(&[
            scene_tables::TEXTURE_CONSTANT as f32,
            0.0,
            scene_tables::TEXTURE_CONSTANT as f32,
            3.0,
            scene_tables::TEXTURE_CONSTANT as f32,
            6.0,
        ]);
        let bsdf = evaluate_material(&tables, scene_tables::MATERIAL_CLEAR_COAT, 0, &flat_hit());
        let mut rng = RngState::new(9, 0);
        let mut saw_specular = false;
        let mut saw_diffuse = false;
        for _ in 0..256 {
            if let Some(sample) = bsdf.sample(Vec3::Z, &mut rng) {
                if sample.specular {
                    saw_specular = true;
                } else {
                    saw_diffuse = true;
                }
            }
        }
        assert!(saw_specular && saw_diffuse);
    }

    #[test]
    fn phong_sample_agrees_with_pdf_and_f() {
        let mut tables = SceneTables::default();
        tables.textures_constant.extend_from_slice(&[0.0, 0.0, 0.0]);
        tables.textures_constant.extend_from_slice(&[0.9, 0.7, 0.4]);
        tables
            .textures_constant
            .extend_from_slice(&[64.0, 64.0, 64.0]);
        tables.materials_metal.extend_from_slice(&[
            scene_tables::TEXTURE_CONSTANT as f32,
            0.0,
            scene_tables::TEXTURE_CONSTANT as f32,
            3.0,
            scene_tables::TEXTURE_CONSTANT as f32,
            6.0,
        ]);
        let bsdf = evaluate_material(&tables, scene_tables::MATERIAL_METAL, 0, &flat_hit());
        let outgoing = Vec3::new(0.2, -0.1, 0.97).normalize();
        let mut rng = RngState::new(5, 2);
        let mut accepted = 0;
        for _ in 0..256 {
            if let Some(sample) = bsdf.sample(outgoing, &mut rng) {
                accepted += 1;
                assert!(sample.pdf > 0.0);
                let pdf = bsdf.pdf(outgoing, sample.incoming);
                assert_relative_eq!(pdf, sample.pdf, epsilon = 1e-3);
                let f = bsdf.evaluate(outgoing, sample.incoming);
                assert_relative_eq!(f.x, sample.result.x, epsilon = 1e-3);
            }
        }
        assert!(accepted > 200);
    }
}
