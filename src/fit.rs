//! Fit geometric primitives to noisy point observations.
//!
//! All functions are pure: they only read their arguments and report degenerate input as an
//! [Error] instead of returning NaNs.

extern crate nalgebra as na;

use cgmath::prelude::*;
use cgmath::{Point2, Point3, Vector2, Vector3};
#[cfg(test)]
use cgmath::AbsDiffEq;
use na::{Matrix3, SymmetricEigen};

use crate::Error;

/// Relative size of the second largest spread direction below which a point set is treated as a
/// line (or a single point) rather than a plane.
const RANK_TOLERANCE: f64 = 1e-10;

/// Least-squares plane through a point set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    /// Centroid of the fitted points.
    pub position: Point3<f64>,
    /// Unit normal.
    pub normal: Vector3<f64>,
    /// Root mean square orthogonal distance of the points to the plane.
    pub rms_error: f64,
}

impl Plane {
    /// Signed distance from `p` to the plane, positive on the side the normal points to.
    pub fn distance(&self, p: Point3<f64>) -> f64 {
        (p - self.position).dot(self.normal)
    }

    /// Closest point on the plane to `p`.
    pub fn project(&self, p: Point3<f64>) -> Point3<f64> {
        p - self.normal * self.distance(p)
    }
}

/// Flip `v` so its largest-magnitude component is positive. Makes the sign of eigenvectors
/// reproducible.
fn canonical_sign(v: Vector3<f64>) -> Vector3<f64> {
    let dominant = if v.x.abs() >= v.y.abs() && v.x.abs() >= v.z.abs() {
        v.x
    } else if v.y.abs() >= v.z.abs() {
        v.y
    } else {
        v.z
    };
    if dominant < 0.0 {
        -v
    } else {
        v
    }
}

/// Fit a plane to `points` by principal component analysis.
///
/// The plane passes through the centroid and its normal is the eigenvector of the covariance
/// matrix with the smallest eigenvalue, which minimizes the sum of squared orthogonal distances.
/// Requires at least 3 points that are not all collinear.
pub fn fit_plane_to_points(points: &[Point3<f64>]) -> Result<Plane, Error> {
    if points.len() < 3 {
        return Err(Error::NotEnoughPoints {
            required: 3,
            actual: points.len(),
        });
    }
    if points.iter().any(|p| !(p.x.is_finite() && p.y.is_finite() && p.z.is_finite())) {
        return Err(Error::Degenerate("non-finite point coordinate".to_string()));
    }

    let n = points.len() as f64;
    let centroid = points
        .iter()
        .fold(Vector3::new(0.0, 0.0, 0.0), |acc, p| acc + p.to_vec() / n);

    // work on deviations divided by their largest magnitude so squaring cannot overflow
    let deviations = points
        .iter()
        .map(|p| p.to_vec() - centroid)
        .collect::<Vec<_>>();
    let scale = deviations
        .iter()
        .fold(0.0f64, |m, d| m.max(d.x.abs()).max(d.y.abs()).max(d.z.abs()));
    if !scale.is_finite() {
        return Err(Error::Degenerate("point coordinates overflow".to_string()));
    }
    if scale == 0.0 {
        return Err(Error::Degenerate(
            "points are collinear or coincident".to_string(),
        ));
    }

    let mut cov = Matrix3::<f64>::zeros();
    for d in &deviations {
        let d = na::Vector3::new(d.x, d.y, d.z) / scale;
        cov += d * d.transpose();
    }

    let eigen = SymmetricEigen::new(cov);
    let mut order = [0usize, 1, 2];
    order.sort_by(|a, b| {
        eigen.eigenvalues[*a]
            .partial_cmp(&eigen.eigenvalues[*b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let largest = eigen.eigenvalues[order[2]];
    let middle = eigen.eigenvalues[order[1]];
    // points spread in fewer than two directions do not define a plane
    if largest <= 0.0 || middle <= largest * RANK_TOLERANCE {
        return Err(Error::Degenerate(
            "points are collinear or coincident".to_string(),
        ));
    }

    let smallest = eigen.eigenvectors.column(order[0]);
    let normal = canonical_sign(Vector3::new(smallest[0], smallest[1], smallest[2]).normalize());
    let position = Point3::from_vec(centroid);

    let rms_error = scale
        * (deviations
            .iter()
            .map(|d| (*d / scale).dot(normal).powi(2))
            .sum::<f64>()
            / n)
            .sqrt();
    if !(normal.x.is_finite() && normal.y.is_finite() && normal.z.is_finite())
        || !rms_error.is_finite()
    {
        return Err(Error::Degenerate("plane fit is not finite".to_string()));
    }

    Ok(Plane {
        position: position,
        normal: normal,
        rms_error: rms_error,
    })
}

/// 2D line from an orthogonal regression.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Line2 {
    /// Centroid of the fitted points; lies on the line.
    pub point: Point2<f64>,
    /// Unit direction with `x >= 0`. A vertical line points along +Y.
    pub direction: Vector2<f64>,
    /// `dy/dx`. Exactly `+inf` for a vertical direction, never NaN.
    pub slope: f64,
    /// Angle of the direction to the x axis in radians, in `(-pi/2, pi/2]`.
    pub angle: f64,
}

impl Line2 {
    /// `y` on the line at `x`, `None` for a vertical line.
    pub fn y_at(&self, x: f64) -> Option<f64> {
        if self.direction.x == 0.0 {
            None
        } else {
            Some(self.point.y + (x - self.point.x) * self.slope)
        }
    }
}

/// Fit a line to the points `(x[i], y[i])` with total least squares.
///
/// Ordinary least squares on `y = mx + b` blows up as the line approaches vertical; this fit
/// minimizes orthogonal distances instead, so vertical and horizontal lines are equally well
/// conditioned. The line direction is the principal axis of the point scatter.
pub fn fit_line_to_points_type2(x: &[f64], y: &[f64]) -> Result<Line2, Error> {
    if x.len() != y.len() {
        return Err(Error::MismatchedLengths {
            left: x.len(),
            right: y.len(),
        });
    }
    if x.len() < 2 {
        return Err(Error::NotEnoughPoints {
            required: 2,
            actual: x.len(),
        });
    }
    if x.iter().chain(y.iter()).any(|v| !v.is_finite()) {
        return Err(Error::Degenerate("non-finite point coordinate".to_string()));
    }
    let distinct = x
        .iter()
        .zip(y)
        .skip(1)
        .any(|(a, b)| *a != x[0] || *b != y[0]);
    if !distinct {
        return Err(Error::Degenerate(
            "line fit needs at least 2 distinct points".to_string(),
        ));
    }

    let n = x.len() as f64;
    let mx = x.iter().fold(0.0, |acc, a| acc + a / n);
    let my = y.iter().fold(0.0, |acc, b| acc + b / n);
    // the direction only depends on the ratios of the moments, so scale them to stay finite
    let scale = x
        .iter()
        .zip(y)
        .fold(0.0f64, |m, (a, b)| m.max((a - mx).abs()).max((b - my).abs()));
    if !scale.is_finite() || scale == 0.0 {
        return Err(Error::Degenerate(
            "point spread is not representable".to_string(),
        ));
    }
    let (sxx, syy, sxy) = x.iter().zip(y).fold((0.0, 0.0, 0.0), |(sxx, syy, sxy), (a, b)| {
        let dx = (a - mx) / scale;
        let dy = (b - my) / scale;
        (sxx + dx * dx, syy + dy * dy, sxy + dx * dy)
    });

    // major axis of the 2x2 scatter matrix
    let theta = 0.5 * (2.0 * sxy).atan2(sxx - syy);
    let mut direction = Vector2::new(theta.cos(), theta.sin());
    if direction.x.abs() < std::f64::EPSILON * direction.y.abs() {
        direction = Vector2::new(0.0, 1.0);
    } else if direction.x < 0.0 {
        direction = -direction;
    }

    if !(direction.x.is_finite() && direction.y.is_finite() && mx.is_finite() && my.is_finite()) {
        return Err(Error::Degenerate("line fit is not finite".to_string()));
    }

    let slope = if direction.x == 0.0 {
        std::f64::INFINITY
    } else {
        direction.y / direction.x
    };

    Ok(Line2 {
        point: Point2::new(mx, my),
        direction: direction,
        slope: slope,
        angle: direction.y.atan2(direction.x),
    })
}

/// Closest point to `point` on the infinite line through `line_a` and `line_b`.
pub fn line_point_intersection(
    point: Point3<f64>,
    line_a: Point3<f64>,
    line_b: Point3<f64>,
) -> Result<Point3<f64>, Error> {
    let dir = line_b - line_a;
    let len2 = dir.magnitude2();
    if !(len2 > 0.0) || !len2.is_finite() {
        return Err(Error::Degenerate(
            "line points coincide, the line has no direction".to_string(),
        ));
    }
    let t = (point - line_a).dot(dir) / len2;
    Ok(line_a + dir * t)
}

#[test]
fn test_plane_exact() {
    let points = vec![
        Point3::new(0.0, 0.0, 1.0),
        Point3::new(1.0, 0.0, 1.0),
        Point3::new(0.0, 1.0, 1.0),
        Point3::new(1.0, 1.0, 1.0),
    ];
    let plane = fit_plane_to_points(&points).unwrap();
    assert!(plane.normal.abs_diff_eq(&Vector3::new(0.0, 0.0, 1.0), 1e-12));
    assert!(plane
        .position
        .abs_diff_eq(&Point3::new(0.5, 0.5, 1.0), 1e-12));
    assert!(plane.rms_error.abs() < 1e-12);
}

#[test]
fn test_plane_tilted_unit_normal() {
    // points on x + y + z = 3
    let points = vec![
        Point3::new(3.0, 0.0, 0.0),
        Point3::new(0.0, 3.0, 0.0),
        Point3::new(0.0, 0.0, 3.0),
        Point3::new(1.0, 1.0, 1.0),
        Point3::new(2.0, -1.0, 2.0),
    ];
    let plane = fit_plane_to_points(&points).unwrap();
    let expected = Vector3::new(1.0, 1.0, 1.0).normalize();
    assert!((plane.normal.magnitude() - 1.0).abs() < 1e-12);
    assert!((plane.normal.dot(expected).abs() - 1.0).abs() < 1e-12);
    assert!(plane.rms_error < 1e-12);
    assert!(plane.distance(Point3::new(1.0, 1.0, 1.0)).abs() < 1e-12);
}

#[test]
fn test_plane_noisy() {
    use rand::distributions::{Distribution, Normal};
    use rand::{Rng, SeedableRng};

    let mut rng = rand::rngs::StdRng::seed_from_u64(7);
    let noise = Normal::new(0.0, 0.01);
    let points = (0..200)
        .map(|_| {
            let x = rng.gen_range(-5.0, 5.0);
            let y = rng.gen_range(-5.0, 5.0);
            Point3::new(x, y, 0.5 * x - 0.25 * y + 2.0 + noise.sample(&mut rng))
        })
        .collect::<Vec<_>>();
    let plane = fit_plane_to_points(&points).unwrap();
    let expected = Vector3::new(-0.5, 0.25, 1.0).normalize();
    assert!(plane.normal.dot(expected).abs() > 0.999);
    assert!(plane.rms_error > 0.0 && plane.rms_error < 0.02);
    let on_plane = plane.project(Point3::new(1.0, 1.0, 10.0));
    assert!(plane.distance(on_plane).abs() < 1e-9);
}

#[test]
fn test_plane_huge_coordinates() {
    let points = vec![
        Point3::new(0.0, 0.0, 1e200),
        Point3::new(1e200, 0.0, 1e200),
        Point3::new(0.0, 1e200, 1e200),
        Point3::new(1e200, 1e200, 1e200),
    ];
    let plane = fit_plane_to_points(&points).unwrap();
    assert!(plane.normal.abs_diff_eq(&Vector3::new(0.0, 0.0, 1.0), 1e-12));
    assert!(plane.position.abs_diff_eq(&Point3::new(5e199, 5e199, 1e200), 1e188));
    assert!(plane.rms_error.is_finite());
    assert!(plane.rms_error < 1e186);

    // squared spreads this small underflow without rescaling
    let tiny = vec![
        Point3::new(0.0, 0.0, 0.0),
        Point3::new(1e-300, 0.0, 0.0),
        Point3::new(0.0, 1e-300, 0.0),
        Point3::new(1e-300, 1e-300, 0.0),
    ];
    let plane = fit_plane_to_points(&tiny).unwrap();
    assert!(plane.normal.abs_diff_eq(&Vector3::new(0.0, 0.0, 1.0), 1e-12));
}

#[test]
fn test_plane_degenerate() {
    assert!(fit_plane_to_points(&[Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 0.0, 0.0)]).is_err());
    let collinear = (0..10)
        .map(|i| Point3::new(i as f64, 2.0 * i as f64, -(i as f64)))
        .collect::<Vec<_>>();
    match fit_plane_to_points(&collinear) {
        Err(Error::Degenerate(_)) => (),
        x => panic!("collinear points should not fit a plane: {:?}", x),
    }
    let coincident = vec![Point3::new(1.0, 2.0, 3.0); 5];
    assert!(fit_plane_to_points(&coincident).is_err());
}

#[test]
fn test_line_vertical() {
    let x = vec![2.0, 2.0, 2.0, 2.0];
    let y = vec![-1.0, 0.0, 3.0, 10.0];
    let line = fit_line_to_points_type2(&x, &y).unwrap();
    assert_eq!(line.direction, Vector2::new(0.0, 1.0));
    assert_eq!(line.point, Point2::new(2.0, 3.0));
    assert!(line.slope.is_infinite() && line.slope > 0.0);
    assert!(!line.angle.is_nan());
    assert_eq!(line.y_at(0.0), None);
}

#[test]
fn test_line_sloped() {
    let x = vec![0.0, 1.0, 2.0, 3.0];
    let y = x.iter().map(|v| 2.0 * v - 1.0).collect::<Vec<_>>();
    let line = fit_line_to_points_type2(&x, &y).unwrap();
    assert!((line.slope - 2.0).abs() < 1e-12);
    assert!((line.y_at(10.0).unwrap() - 19.0).abs() < 1e-9);
    assert!(line.direction.x > 0.0);

    // negative slope keeps x positive in the direction
    let y = x.iter().map(|v| -0.5 * v).collect::<Vec<_>>();
    let line = fit_line_to_points_type2(&x, &y).unwrap();
    assert!((line.slope + 0.5).abs() < 1e-12);
    assert!(line.direction.x > 0.0 && line.direction.y < 0.0);
}

#[test]
fn test_line_huge_coordinates() {
    let x = vec![1e200, 2e200, 3e200];
    let line = fit_line_to_points_type2(&x, &x).unwrap();
    let diagonal = std::f64::consts::FRAC_1_SQRT_2;
    assert!((line.direction.x - diagonal).abs() < 1e-12);
    assert!((line.direction.y - diagonal).abs() < 1e-12);
    assert!((line.slope - 1.0).abs() < 1e-12);
    assert!((line.angle - std::f64::consts::FRAC_PI_4).abs() < 1e-12);
    assert!((line.point.x / 2e200 - 1.0).abs() < 1e-12);
    assert!(line.point.y.is_finite());
}

#[test]
fn test_line_near_vertical_noisy() {
    use rand::distributions::{Distribution, Normal};
    use rand::{Rng, SeedableRng};

    let lean = 0.001f64;
    let mut rng = rand::rngs::StdRng::seed_from_u64(11);
    let noise = Normal::new(0.0, 1e-4);
    for sign in &[1.0, -1.0] {
        let expected = Vector2::new(sign * lean.sin(), lean.cos());
        let (x, y): (Vec<f64>, Vec<f64>) = (0..200)
            .map(|_| {
                let t = rng.gen_range(-10.0, 10.0);
                (
                    3.0 + t * expected.x + noise.sample(&mut rng),
                    -2.0 + t * expected.y + noise.sample(&mut rng),
                )
            })
            .unzip();
        let line = fit_line_to_points_type2(&x, &y).unwrap();
        assert!(line.direction.x > 0.0);
        // direction is only defined up to sign
        assert!((line.direction.dot(expected).abs() - 1.0).abs() < 1e-9);
        assert!(line.slope.is_finite());
        assert!(line.slope.abs() > 500.0);
        assert_eq!(line.slope > 0.0, *sign > 0.0);
        assert!((line.angle.abs() - (std::f64::consts::FRAC_PI_2 - lean)).abs() < 1e-4);
        assert!((line.point.x - 3.0).abs() < 0.5);
    }
}

#[test]
fn test_line_invalid_input() {
    assert!(fit_line_to_points_type2(&[1.0], &[1.0]).is_err());
    assert!(fit_line_to_points_type2(&[1.0, 2.0], &[1.0]).is_err());
    assert!(fit_line_to_points_type2(&[1.0, 1.0, 1.0], &[4.0, 4.0, 4.0]).is_err());
}

#[test]
fn test_line_point_intersection() {
    let a = Point3::new(0.0, 0.0, 0.0);
    let b = Point3::new(2.0, 0.0, 0.0);
    let p = line_point_intersection(Point3::new(5.0, 3.0, -1.0), a, b).unwrap();
    assert!(p.abs_diff_eq(&Point3::new(5.0, 0.0, 0.0), 1e-12));

    let on_line = Point3::new(0.7, 1.4, 2.1);
    let p = line_point_intersection(on_line, Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 2.0, 3.0))
        .unwrap();
    assert!(p.abs_diff_eq(&on_line, 1e-12));

    assert!(line_point_intersection(on_line, a, a).is_err());
}
