//! Polynomial root finders for the quadric and quartic shapes. The quartic
//! runs in f64; torus intersection is numerically hopeless in f32.

const TINY: f64 = 1e-9;

/// Smallest real root of `a*t^2 + b*t + c` inside the open interval
/// `(t_min, t_max)`, or 0.0 when no root qualifies.
pub fn solve_quadratic(a: f32, b: f32, c: f32, t_min: f32, t_max: f32) -> f32 {
    let discriminant = b * b - 4.0 * a * c;
    if discriminant < 0.0 {
        return 0.0;
    }
    let sqrt_discriminant = discriminant.sqrt();
    let q = if b < 0.0 {
        -0.5 * (b - sqrt_discriminant)
    } else {
        -0.5 * (b + sqrt_discriminant)
    };
    let (t0, t1) = {
        let r0 = q / a;
        let r1 = c / q;
        if r0 < r1 {
            (r0, r1)
        } else {
            (r1, r0)
        }
    };
    if t0 > t_min && t0 < t_max {
        t0
    } else if t1 > t_min && t1 < t_max {
        t1
    } else {
        0.0
    }
}

/// All real roots of a normalized cubic `x^3 + a*x^2 + b*x + c`.
fn solve_cubic_normalized(a: f64, b: f64, c: f64, roots: &mut [f64; 4]) -> usize {
    let sq_a = a * a;
    let p = (-sq_a / 3.0 + b) / 3.0;
    let q = (2.0 / 27.0 * a * sq_a - a * b / 3.0 + c) / 2.0;
    let cb_p = p * p * p;
    let discriminant = q * q + cb_p;
    let shift = a / 3.0;

    let count;
    if discriminant.abs() < TINY {
        if q.abs() < TINY {
            roots[0] = 0.0;
            count = 1;
        } else {
            let u = (-q).cbrt();
            roots[0] = 2.0 * u;
            roots[1] = -u;
            count = 2;
        }
    } else if discriminant < 0.0 {
        let phi = ((-q) / (-cb_p).sqrt()).clamp(-1.0, 1.0).acos() / 3.0;
        let t = 2.0 * (-p).sqrt();
        roots[0] = t * phi.cos();
        roots[1] = -t * (phi + core::f64::consts::PI / 3.0).cos();
        roots[2] = -t * (phi - core::f64::consts::PI / 3.0).cos();
        count = 3;
    } else {
        let sqrt_d = discriminant.sqrt();
        let u = (sqrt_d - q).cbrt();
        let v = -(sqrt_d + q).cbrt();
        roots[0] = u + v;
        count = 1;
    }
    for root in roots.iter_mut().take(count) {
        *root -= shift;
    }
    count
}

fn push_quadratic_roots(p: f64, q: f64, roots: &mut [f64; 4], count: &mut usize) {
    // x^2 + p*x + q
    let discriminant = p * p / 4.0 - q;
    if discriminant < 0.0 {
        return;
    }
    let sqrt_discriminant = discriminant.sqrt();
    roots[*count] = -p / 2.0 + sqrt_discriminant;
    roots[*count + 1] = -p / 2.0 - sqrt_discriminant;
    *count += 2;
}

/// Smallest real root of `a*t^4 + b*t^3 + c*t^2 + d*t + e` inside
/// `(t_min, t_max)`, or 0.0. Ferrari's method via the resolvent cubic.
pub fn solve_quartic(a: f64, b: f64, c: f64, d: f64, e: f64, t_min: f32, t_max: f32) -> f32 {
    if a.abs() < TINY {
        return 0.0;
    }
    let a3 = b / a;
    let a2 = c / a;
    let a1 = d / a;
    let a0 = e / a;

    // Depress: x = y - a3/4.
    let sq_a3 = a3 * a3;
    let p = -3.0 / 8.0 * sq_a3 + a2;
    let q = sq_a3 * a3 / 8.0 - a3 * a2 / 2.0 + a1;
    let r = -3.0 / 256.0 * sq_a3 * sq_a3 + sq_a3 * a2 / 16.0 - a3 * a1 / 4.0 + a0;

    let mut roots = [0.0f64; 4];
    let mut count = 0usize;

    if r.abs() < TINY {
        // y * (y^3 + p*y + q) = 0
        let mut cubic_roots = [0.0f64; 4];
        let cubic_count = solve_cubic_normalized(0.0, p, q, &mut cubic_roots);
        roots[..cubic_count].copy_from_slice(&cubic_roots[..cubic_count]);
        count = cubic_count;
        roots[count] = 0.0;
        count += 1;
    } else {
        let mut cubic_roots = [0.0f64; 4];
        solve_cubic_normalized(-p / 2.0, -r, r * p / 2.0 - q * q / 8.0, &mut cubic_roots);
        let z = cubic_roots[0];

        let mut u = z * z - r;
        let mut v = 2.0 * z - p;
        if u.abs() < TINY {
            u = 0.0;
        } else if u > 0.0 {
            u = u.sqrt();
        } else {
            return 0.0;
        }
        if v.abs() < TINY {
            v = 0.0;
        } else if v > 0.0 {
            v = v.sqrt();
        } else {
            return 0.0;
        }

        let first_p = if q < 0.0 { -v } else { v };
        push_quadratic_roots(first_p, z - u, &mut roots, &mut count);
        push_quadratic_roots(-first_p, z + u, &mut roots, &mut count);
    }

    let shift = a3 / 4.0;
    let mut best = 0.0f32;
    for root in roots.iter().take(count) {
        let t = (root - shift) as f32;
        if t > t_min && t < t_max && (best == 0.0 || t < best) {
            best = t;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn quadratic_picks_smallest_root_in_interval() {
        // (t - 2)(t - 5) = t^2 - 7t + 10
        assert_relative_eq!(solve_quadratic(1.0, -7.0, 10.0, 0.0, 10.0), 2.0);
        assert_relative_eq!(solve_quadratic(1.0, -7.0, 10.0, 3.0, 10.0), 5.0);
        assert_eq!(solve_quadratic(1.0, -7.0, 10.0, 6.0, 10.0), 0.0);
    }

    #[test]
    fn quadratic_rejects_negative_discriminant() {
        assert_eq!(solve_quadratic(1.0, 0.0, 1.0, 0.0, 10.0), 0.0);
    }

    #[test]
    fn quadratic_excludes_tangent_double_root_boundary() {
        // (t - 3)^2: root exactly at interval edge must not qualify
        assert_eq!(solve_quadratic(1.0, -6.0, 9.0, 3.0, 10.0), 0.0);
    }

    #[test]
    fn quartic_finds_known_roots() {
        // (t^2 - 1)(t^2 - 4) = t^4 - 5t^2 + 4, roots -2, -1, 1, 2
        let t = solve_quartic(1.0, 0.0, -5.0, 0.0, 4.0, 0.5, 10.0);
        assert_relative_eq!(t, 1.0, epsilon = 1e-4);
        let t = solve_quartic(1.0, 0.0, -5.0, 0.0, 4.0, 1.5, 10.0);
        assert_relative_eq!(t, 2.0, epsilon = 1e-4);
        assert_eq!(solve_quartic(1.0, 0.0, -5.0, 0.0, 4.0, 2.5, 10.0), 0.0);
    }

    #[test]
    fn quartic_handles_shifted_roots() {
        // (t-1)(t-2)(t-3)(t-4) = t^4 - 10t^3 + 35t^2 - 50t + 24
        let t = solve_quartic(1.0, -10.0, 35.0, -50.0, 24.0, 0.0, 10.0);
        assert_relative_eq!(t, 1.0, epsilon = 1e-4);
        let t = solve_quartic(1.0, -10.0, 35.0, -50.0, 24.0, 2.5, 10.0);
        assert_relative_eq!(t, 3.0, epsilon = 1e-4);
    }

    #[test]
    fn quartic_with_no_real_roots_returns_zero() {
        // t^4 + 1
        assert_eq!(solve_quartic(1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 10.0), 0.0);
    }
}
