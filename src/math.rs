use nalgebra as na;
use num_traits::Float;

pub type Point = na::Point2<f32>;

const EPS: f32 = 1e-9;

/// Even-odd containment test of `p` in a closed polygon.
pub fn in_bounds(p: Point, poly: &[Point]) -> bool {
    let n = poly.len();
    if n < 3 {
        return false;
    }

    let mut inside = false;
    let mut p1 = poly[0];
    let mut xints = 0.0;

    for i in 1..=n {
        let p2 = poly[i % n];

        if p.y > f32::min(p1.y, p2.y) && p.y <= f32::max(p1.y, p2.y) && p.x <= f32::max(p1.x, p2.x)
        {
            if (p1.y - p2.y).abs() > f32::EPSILON {
                xints = (p.y - p1.y) * (p2.x - p1.x) / (p2.y - p1.y) + p1.x;
            }

            if (p1.x - p2.x).abs() < f32::EPSILON || p.x <= xints {
                inside = !inside;
            }
        }

        p1 = p2;
    }

    inside
}

pub fn point_segment_distance(p: Point, a: Point, b: Point) -> f32 {
    let ab = b - a;
    let len2 = ab.norm_squared();
    if len2 <= EPS {
        return na::distance(&p, &a);
    }

    let t = ((p - a).dot(&ab) / len2).clamp(0.0, 1.0);
    na::distance(&p, &(a + ab * t))
}

/// Distance from `p` to a closed polygon, zero inside it.
pub fn point_polygon_distance(p: Point, poly: &[Point]) -> f32 {
    if in_bounds(p, poly) {
        return 0.0;
    }

    let n = poly.len();
    (0..n)
        .map(|i| point_segment_distance(p, poly[i], poly[(i + 1) % n]))
        .fold(f32::INFINITY, f32::min)
}

/// Closest approach between segments `p1-q1` and `p2-q2`.
///
/// Returns the parameters `(s, t)` of the closest points along each segment
/// and the distance between them.
pub fn segment_closest(p1: Point, q1: Point, p2: Point, q2: Point) -> (f32, f32, f32) {
    let d1 = q1 - p1;
    let d2 = q2 - p2;
    let r = p1 - p2;
    let a = d1.norm_squared();
    let e = d2.norm_squared();
    let f = d2.dot(&r);

    let (s, t) = if a <= EPS && e <= EPS {
        (0.0, 0.0)
    } else if a <= EPS {
        (0.0, (f / e).clamp(0.0, 1.0))
    } else {
        let c = d1.dot(&r);

        if e <= EPS {
            ((-c / a).clamp(0.0, 1.0), 0.0)
        } else {
            let b = d1.dot(&d2);
            let denom = a * e - b * b;
            let s = if denom.abs() > EPS {
                ((b * f - c * e) / denom).clamp(0.0, 1.0)
            } else {
                0.0
            };

            let t = (b * s + f) / e;
            if t < 0.0 {
                ((-c / a).clamp(0.0, 1.0), 0.0)
            } else if t > 1.0 {
                (((b - c) / a).clamp(0.0, 1.0), 1.0)
            } else {
                (s, t)
            }
        }
    };

    let c1 = p1 + d1 * s;
    let c2 = p2 + d2 * t;

    (s, t, na::distance(&c1, &c2))
}

/// Signed angle from `a` to `b` in degrees, positive when the 2D cross
/// product `a x b` is positive.
pub fn signed_angle_deg(a: na::Vector2<f32>, b: na::Vector2<f32>) -> f32 {
    let cross = a.x * b.y - a.y * b.x;
    let dot = a.dot(&b);

    if cross.abs() <= EPS && dot.abs() <= EPS {
        return 0.0;
    }

    cross.atan2(dot).to_degrees()
}

#[inline]
pub fn lerp<F: Float>(a: F, b: F, factor: F) -> F {
    a * (F::one() - factor) + b * factor
}

/// Median of the finite values, `None` when there are none.
pub fn median<F: Float>(values: &[F]) -> Option<F> {
    let mut sorted: Vec<F> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }

    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        let two = F::one() + F::one();
        Some((sorted[mid - 1] + sorted[mid]) / two)
    } else {
        Some(sorted[mid])
    }
}
