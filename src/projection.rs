//! Albers conic equal-area projection and SVG path generation.

use crate::config::MapConfig;
use geo::{Coord, LineString, MultiPolygon};
use std::f64::consts::PI;
use std::fmt::Write;

/// Conic equal-area projection with a longitude rotation, scale and
/// translate, matching the usual web-map Albers setup.
#[derive(Debug, Clone)]
pub struct Albers {
    n: f64,
    c: f64,
    rho0: f64,
    rotate_lambda: f64,
    k: f64,
    dx: f64,
    dy: f64,
}

impl Albers {
    pub fn from_config(map: &MapConfig) -> Self {
        Self::new(
            map.center,
            map.rotate[0],
            map.parallels,
            map.scale,
            [map.width / 2.0, map.height / 2.0],
        )
    }

    pub fn new(
        center: [f64; 2],
        rotate_lambda: f64,
        parallels: [f64; 2],
        scale: f64,
        translate: [f64; 2],
    ) -> Self {
        let phi0 = parallels[0].to_radians();
        let phi1 = parallels[1].to_radians();
        let sy0 = phi0.sin();
        let n = (sy0 + phi1.sin()) / 2.0;
        let c = 1.0 + sy0 * (2.0 * n - sy0);
        let rho0 = c.sqrt() / n;

        let mut projection = Self {
            n,
            c,
            rho0,
            rotate_lambda: rotate_lambda.to_radians(),
            k: scale,
            dx: 0.0,
            dy: 0.0,
        };

        // Center is projected without rotation
        let (cx, cy) = projection.raw(center[0].to_radians(), center[1].to_radians());
        projection.dx = translate[0] - cx * scale;
        projection.dy = translate[1] + cy * scale;
        projection
    }

    fn raw(&self, lambda: f64, phi: f64) -> (f64, f64) {
        let rho = (self.c - 2.0 * self.n * phi.sin()).max(0.0).sqrt() / self.n;
        let theta = lambda * self.n;
        (rho * theta.sin(), self.rho0 - rho * theta.cos())
    }

    /// Project `[lon, lat]` degrees to pixel coordinates.
    pub fn project(&self, lon: f64, lat: f64) -> (f64, f64) {
        let mut lambda = lon.to_radians() + self.rotate_lambda;
        if lambda > PI {
            lambda -= 2.0 * PI;
        } else if lambda < -PI {
            lambda += 2.0 * PI;
        }
        let (x, y) = self.raw(lambda, lat.to_radians());
        (x * self.k + self.dx, self.dy - y * self.k)
    }

    fn ring(&self, ring: &LineString<f64>, out: &mut String) {
        let mut coords = ring.coords();
        let Some(first) = coords.next() else {
            return;
        };
        let (x, y) = self.project(first.x, first.y);
        let _ = write!(out, "M{:.1},{:.1}", x, y);
        for Coord { x: lon, y: lat } in coords {
            let (x, y) = self.project(*lon, *lat);
            let _ = write!(out, "L{:.1},{:.1}", x, y);
        }
        out.push('Z');
    }

    /// SVG path data for every ring of a multipolygon.
    pub fn path(&self, geometry: &MultiPolygon<f64>) -> String {
        let mut d = String::new();
        for polygon in geometry {
            self.ring(polygon.exterior(), &mut d);
            for interior in polygon.interiors() {
                self.ring(interior, &mut d);
            }
        }
        d
    }

    /// Open polyline through `[lon, lat]` points.
    pub fn line(&self, points: &[(f64, f64)]) -> String {
        let mut d = String::new();
        for (i, (lon, lat)) in points.iter().enumerate() {
            let (x, y) = self.project(*lon, *lat);
            let cmd = if i == 0 { 'M' } else { 'L' };
            let _ = write!(d, "{}{:.1},{:.1}", cmd, x, y);
        }
        d
    }
}

/// Meridians and parallels every `step` degrees inside `extent`, each
/// densified so it curves under the conic projection.
pub struct Graticule {
    pub lines: Vec<Vec<(f64, f64)>>,
    pub outline: Vec<(f64, f64)>,
}

const DENSIFY: f64 = 0.1;

impl Graticule {
    pub fn new(step: [f64; 2], extent: [[f64; 2]; 2]) -> Self {
        let [[west, south], [east, north]] = extent;
        let mut lines = Vec::new();

        for lon in stepped(west, east, step[0]) {
            lines.push(stepped(south, north, DENSIFY).map(|lat| (lon, lat)).collect());
        }
        for lat in stepped(south, north, step[1]) {
            lines.push(stepped(west, east, DENSIFY).map(|lon| (lon, lat)).collect());
        }

        let mut outline: Vec<(f64, f64)> = Vec::new();
        outline.extend(stepped(south, north, DENSIFY).map(|lat| (west, lat)));
        outline.extend(stepped(west, east, DENSIFY).map(|lon| (lon, north)));
        outline.extend(stepped(south, north, DENSIFY).rev().map(|lat| (east, lat)));
        outline.extend(stepped(west, east, DENSIFY).rev().map(|lon| (lon, south)));

        Self { lines, outline }
    }
}

/// `lo, lo+step, ..., hi` (inclusive, tolerant of rounding).
fn stepped(lo: f64, hi: f64, step: f64) -> impl DoubleEndedIterator<Item = f64> {
    let count = ((hi - lo) / step + 1e-9).floor().max(0.0) as usize;
    (0..=count).map(move |i| lo + i as f64 * step)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;

    fn louisiana() -> Albers {
        Albers::from_config(&MapConfig::default())
    }

    #[test]
    fn center_lands_on_translate_point() {
        // Rotation by 91.8 degrees moves -91.8 onto the central meridian
        let (x, y) = louisiana().project(-91.8, 31.0);
        assert!((x - 400.0).abs() < 1e-6, "x = {x}");
        assert!((y - 350.0).abs() < 1e-6, "y = {y}");
    }

    #[test]
    fn north_is_up_and_east_is_right() {
        let p = louisiana();
        let (_, y_south) = p.project(-91.8, 29.0);
        let (_, y_north) = p.project(-91.8, 33.0);
        assert!(y_north < y_south);

        let (x_west, _) = p.project(-93.5, 31.0);
        let (x_east, _) = p.project(-89.5, 31.0);
        assert!(x_west < x_east);
    }

    #[test]
    fn path_closes_every_ring() {
        let poly = polygon![
            (x: -92.0, y: 30.0),
            (x: -91.0, y: 30.0),
            (x: -91.0, y: 31.0),
            (x: -92.0, y: 30.0),
        ];
        let d = louisiana().path(&MultiPolygon::new(vec![poly]));
        assert!(d.starts_with('M'));
        assert!(d.ends_with('Z'));
        assert_eq!(d.matches('L').count(), 3);
    }

    #[test]
    fn graticule_covers_extent() {
        let g = Graticule::new([0.5, 0.5], [[-94.0, 29.0], [-89.0, 33.0]]);
        // 11 meridians, 9 parallels
        assert_eq!(g.lines.len(), 20);
        assert_eq!(g.outline.first(), Some(&(-94.0, 29.0)));
    }
}
