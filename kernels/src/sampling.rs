use core::f32::consts::PI;

use glam::{Vec2, Vec3};

/// Epsilon for near-zero determinant and direction tests.
pub const EPS: f32 = 1e-4;

/// Offset applied along a new ray direction to avoid self-intersection.
pub const RAY_OFFSET: f32 = 1e-3;

/// Cosine-weighted hemisphere around +Z: phi = 2*pi*u, r = sqrt(v).
pub fn cosine_sample_hemisphere(u: f32, v: f32) -> Vec3 {
    let phi = 2.0 * PI * u;
    let r = v.sqrt();
    Vec3::new(r * phi.cos(), r * phi.sin(), (1.0 - v).max(0.0).sqrt())
}

/// Power-cosine hemisphere around +Z, z = u^(1/(exponent+1)).
pub fn power_cosine_sample_hemisphere(u: f32, v: f32, exponent: f32) -> Vec3 {
    let phi = 2.0 * PI * v;
    let z = u.powf(1.0 / (exponent + 1.0));
    let r = (1.0 - z * z).max(0.0).sqrt();
    Vec3::new(r * phi.cos(), r * phi.sin(), z)
}

pub fn uniform_sample_hemisphere(u: f32, v: f32) -> Vec3 {
    let phi = 2.0 * PI * v;
    let r = (1.0 - u * u).max(0.0).sqrt();
    Vec3::new(r * phi.cos(), r * phi.sin(), u)
}

pub fn uniform_sample_sphere(u: f32, v: f32) -> Vec3 {
    let z = 1.0 - 2.0 * u;
    let r = (1.0 - z * z).max(0.0).sqrt();
    let phi = 2.0 * PI * v;
    Vec3::new(r * phi.cos(), r * phi.sin(), z)
}

pub const UNIFORM_SPHERE_PDF: f32 = 1.0 / (4.0 * PI);

/// Concentric-free polar mapping of the unit square onto the unit disk.
pub fn uniform_sample_disk(u: f32, v: f32) -> Vec2 {
    let r = u.sqrt();
    let phi = 2.0 * PI * v;
    Vec2::new(r * phi.cos(), r * phi.sin())
}

/// Warp a uniform [0,1) sample into [-1,1) with triangular density,
/// peaked at 0. Used for the sub-pixel reconstruction filter.
pub fn sample_triangle_filter(u: f32) -> f32 {
    let s = 2.0 * u;
    if s < 1.0 {
        s.sqrt() - 1.0
    } else {
        1.0 - (2.0 - s).sqrt()
    }
}

/// A right-handed orthonormal frame. W is the normal direction for shading
/// frames; U and V span the tangent plane.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OrthonormalBasis {
    pub u: Vec3,
    pub v: Vec3,
    pub w: Vec3,
}

impl OrthonormalBasis {
    /// Build a frame from a unit W. The helper axis is the one W leans away
    /// from the most, so the cross products never degenerate.
    pub fn from_w(w: Vec3) -> Self {
        let abs = w.abs();
        let axis = if abs.x < abs.y && abs.x < abs.z {
            Vec3::X
        } else if abs.y < abs.z {
            Vec3::Y
        } else {
            Vec3::Z
        };
        let v = w.cross(axis).normalize();
        let u = v.cross(w);
        Self { u, v, w }
    }

    /// Build a frame from a unit W and a V hint that need not be exactly
    /// orthogonal; V is re-orthogonalized against W.
    pub fn from_wv(w: Vec3, v_hint: Vec3) -> Self {
        let w = w.normalize();
        let u = v_hint.cross(w).normalize();
        let v = w.cross(u);
        Self { u, v, w }
    }

    pub fn to_local(&self, direction: Vec3) -> Vec3 {
        Vec3::new(
            direction.dot(self.u),
            direction.dot(self.v),
            direction.dot(self.w),
        )
    }

    pub fn to_world(&self, direction: Vec3) -> Vec3 {
        self.u * direction.x + self.v * direction.y + self.w * direction.z
    }
}

pub fn reflect(incident: Vec3, normal: Vec3) -> Vec3 {
    incident - normal * 2.0 * incident.dot(normal)
}

/// Snell refraction of a direction pointing toward the surface. Returns
/// `None` on total internal reflection.
pub fn refract(incident: Vec3, normal: Vec3, eta_ratio: f32) -> Option<Vec3> {
    let cos_i = -normal.dot(incident);
    let sin2_t = eta_ratio * eta_ratio * (1.0 - cos_i * cos_i);
    if sin2_t > 1.0 {
        return None;
    }
    let cos_t = (1.0 - sin2_t).sqrt();
    Some(incident * eta_ratio + normal * (eta_ratio * cos_i - cos_t))
}

/// Exact dielectric Fresnel reflectance for unpolarized light.
pub fn fresnel_dielectric(cos_theta_i: f32, eta_i: f32, eta_t: f32) -> f32 {
    let cos_i = cos_theta_i.clamp(-1.0, 1.0).abs();
    let sin_i = (1.0 - cos_i * cos_i).max(0.0).sqrt();
    let sin_t = eta_i / eta_t * sin_i;
    if sin_t >= 1.0 {
        return 1.0;
    }
    let cos_t = (1.0 - sin_t * sin_t).max(0.0).sqrt();
    let parallel = (eta_t * cos_i - eta_i * cos_t) / (eta_t * cos_i + eta_i * cos_t);
    let perpendicular = (eta_i * cos_i - eta_t * cos_t) / (eta_i * cos_i + eta_t * cos_t);
    (parallel * parallel + perpendicular * perpendicular) / 2.0
}

pub fn fresnel_schlick(cos_theta: f32, f0: Vec3) -> Vec3 {
    f0 + (Vec3::ONE - f0) * (1.0 - cos_theta).max(0.0).powi(5)
}

pub fn power_heuristic(p1: f32, p2: f32) -> f32 {
    let p1_2 = p1 * p1;
    p1_2 / (p1_2 + p2 * p2)
}

#[allow(dead_code)]
pub fn balance_heuristic(p1: f32, p2: f32) -> f32 {
    p1 / (p1 + p2)
}

pub fn mask_nan(v: Vec3) -> Vec3 {
    if v.is_finite() {
        v
    } else {
        Vec3::ZERO
    }
}
