use crate::io::*;
use crate::io::{Readable, Writable};
use crate::types::*;
use bsp_derive::{Readable, Writable};
use bytes::{Buf, BufMut};
use cgmath::{InnerSpace, Vector3, Zero};
use typed_ints::TypedInt;

typed_int!(LinkIndex, _LinkIndex, u32);
typed_int!(BrushPolyIndex, _BrushPolyIndex, u32);

bitflags! {
    pub struct PolyFlags: u32 {
        const INVISIBLE = 0x0000_0001;
        const NOT_SOLID = 0x0000_0008;
        const SEMISOLID = 0x0000_0020;
        const TWO_SIDED = 0x0000_0100;
        const SELECTED = 0x0200_0000;
        const PORTAL = 0x0400_0000;
        const NO_ADD_TO_BSP = 0x2000_0000;
        const ED_PROCESSED = 0x4000_0000;
        const ED_CUT = 0x8000_0000;

        /// Brushes carrying either flag are filtered after all solid geometry.
        const ADD_LAST = Self::SEMISOLID.bits | Self::NOT_SOLID.bits;
        /// Editor bookkeeping that never survives into a surface.
        const TRANSIENT = Self::ED_CUT.bits | Self::ED_PROCESSED.bits | Self::SELECTED.bits;
    }
}

bitflags_io!(PolyFlags, u32);

/// Where a polygon lies relative to a plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaneSide {
    Coplanar,
    Front,
    Back,
    Split,
}

#[derive(Debug, Clone)]
pub enum SplitResult {
    Coplanar,
    Front,
    Back,
    Split { front: Polygon, back: Polygon },
}

impl SplitResult {
    pub fn side(&self) -> PlaneSide {
        match self {
            SplitResult::Coplanar => PlaneSide::Coplanar,
            SplitResult::Front => PlaneSide::Front,
            SplitResult::Back => PlaneSide::Back,
            SplitResult::Split { .. } => PlaneSide::Split,
        }
    }
}

/// A convex planar polygon. Vertices wind counter-clockwise seen from the front.
#[derive(Debug, Clone, PartialEq, Readable, Writable)]
pub struct Polygon {
    pub vertices: Vec<Point3>,
    pub base: Point3,
    pub normal: Point3,
    pub texture_u: Point3,
    pub texture_v: Point3,
    pub flags: PolyFlags,
    pub material: u32,
    pub link: Option<LinkIndex>,
    pub brush_poly: Option<BrushPolyIndex>,
}

#[derive(Clone, Copy, PartialEq)]
enum VertexStatus {
    Front,
    Back,
    Either,
}

/// Two unit vectors spanning the plane of `normal`, with `axis1 x axis2 == normal`.
pub fn find_best_axis_vectors(normal: &Point3) -> (Point3, Point3) {
    let nx = normal.x.abs();
    let ny = normal.y.abs();
    let nz = normal.z.abs();

    let axis = if nz > nx && nz > ny {
        Vector3::unit_x()
    } else {
        Vector3::unit_z()
    };
    let axis1 = safe_normalize(axis - normal * axis.dot(*normal));
    let axis2 = normal.cross(axis1);
    (axis1, axis2)
}

fn safe_normalize(v: Point3) -> Point3 {
    if v.magnitude2() < THRESH_ZERO_NORM_SQUARED {
        Vector3::zero()
    } else {
        v.normalize()
    }
}

pub fn line_plane_intersection(p1: &Point3, p2: &Point3, base: &Point3, normal: &Point3) -> Point3 {
    let direction = p2 - p1;
    let denominator = direction.dot(*normal);
    if denominator.abs() < Real::EPSILON {
        return *p1;
    }
    p1 + direction * ((base - p1).dot(*normal) / denominator)
}

impl Polygon {
    /// A polygon over `vertices` with its plane and texture basis derived from them.
    pub fn from_vertices(vertices: Vec<Point3>) -> Polygon {
        let mut poly = Polygon {
            base: vertices.first().copied().unwrap_or_else(Vector3::zero),
            vertices,
            normal: Vector3::zero(),
            texture_u: Vector3::zero(),
            texture_v: Vector3::zero(),
            flags: PolyFlags::empty(),
            material: 0,
            link: None,
            brush_poly: None,
        };
        poly.finalize();
        poly
    }

    /// A huge square on `plane`, large enough to cover the whole world.
    pub fn infinite(plane: &PlaneF) -> Polygon {
        let base = plane.origin();
        let (axis1, axis2) = find_best_axis_vectors(&plane.normal);
        let (a, b) = (axis1 * WORLD_MAX, axis2 * WORLD_MAX);
        Polygon {
            vertices: vec![base + a + b, base - a + b, base - a - b, base + a - b],
            base,
            normal: plane.normal,
            texture_u: Vector3::zero(),
            texture_v: Vector3::zero(),
            flags: PolyFlags::empty(),
            material: 0,
            link: None,
            brush_poly: None,
        }
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    pub fn plane(&self) -> PlaneF {
        let point = self.vertices.first().unwrap_or(&self.base);
        PlaneF::from_point_normal(point, &self.normal)
    }

    /// Recomputes the normal from the vertex fan. Fails for degenerate polygons.
    pub fn calc_normal(&mut self) -> bool {
        if self.vertices.len() < 3 {
            return false;
        }
        let v0 = self.vertices[0];
        let sum = self
            .vertices
            .windows(2)
            .skip(1)
            .fold(Vector3::zero(), |acc: Point3, w| {
                acc + (w[0] - v0).cross(w[1] - v0)
            });
        if sum.magnitude2() < THRESH_ZERO_NORM_SQUARED {
            return false;
        }
        self.normal = sum.normalize();
        true
    }

    /// Fewer than three vertices, or no plane to put the polygon on.
    pub fn is_degenerate(&self) -> bool {
        self.vertices.len() < 3 || self.normal.magnitude2() < THRESH_ZERO_NORM_SQUARED
    }

    /// Fills in a missing normal, base and texture basis.
    pub fn finalize(&mut self) -> bool {
        if self.fix() < 3 {
            return false;
        }
        if self.normal.is_zero() && !self.calc_normal() {
            return false;
        }
        self.base = self.vertices[0];
        if self.texture_u.is_zero() && self.texture_v.is_zero() {
            let (u, v) = find_best_axis_vectors(&self.normal);
            self.texture_u = u;
            self.texture_v = v;
        }
        true
    }

    pub fn area(&self) -> Real {
        if self.vertices.len() < 3 {
            return 0.0;
        }
        let v0 = self.vertices[0];
        self.vertices
            .windows(2)
            .skip(1)
            .map(|w| (w[0] - v0).cross(w[1] - v0).magnitude())
            .sum::<Real>()
            / 2.0
    }

    pub fn reverse(&mut self) {
        self.normal = -self.normal;
        self.vertices.reverse();
    }

    pub fn reversed(&self) -> Polygon {
        let mut poly = self.clone();
        poly.reverse();
        poly
    }

    /// Removes consecutive (and wrap-around) duplicate vertices. Returns the remaining
    /// vertex count, emptying the polygon when fewer than three are left.
    pub fn fix(&mut self) -> usize {
        let mut kept: Vec<Point3> = Vec::with_capacity(self.vertices.len());
        for vertex in self.vertices.iter() {
            let duplicate = kept
                .last()
                .or_else(|| self.vertices.last())
                .map_or(false, |prev| points_are_same(vertex, prev));
            if !duplicate {
                kept.push(*vertex);
            }
        }
        // The first vertex was compared against the original last vertex; the kept
        // ring can still close on a duplicate.
        while kept.len() >= 2 && points_are_same(&kept[0], &kept[kept.len() - 1]) {
            kept.pop();
        }
        if kept.len() < 3 {
            kept.clear();
        }
        self.vertices = kept;
        self.vertices.len()
    }

    /// Drops colinear and coincident vertices. Returns false if the polygon is
    /// degenerate or not convex, in which case it may have been emptied.
    pub fn remove_colinears(&mut self) -> bool {
        let mut side_normals: Vec<Point3> = Vec::with_capacity(self.vertices.len());
        let mut i = 0;
        while i < self.vertices.len() {
            let j = (i + self.vertices.len() - 1) % self.vertices.len();
            let side = self.vertices[i] - self.vertices[j];
            let side_normal = side.cross(self.normal);
            if side_normal.magnitude2() < THRESH_ZERO_NORM_SQUARED {
                self.vertices.remove(i);
                if self.vertices.len() < 3 {
                    self.vertices.clear();
                    return false;
                }
                side_normals.clear();
                i = 0;
                continue;
            }
            side_normals.push(side_normal.normalize());
            i += 1;
        }

        let mut i = 0;
        while i < self.vertices.len() {
            let j = (i + 1) % self.vertices.len();
            if points_are_near(&side_normals[i], &side_normals[j], THRESH_NORMAL) {
                // Vertex i continues the side that ends at it.
                self.vertices.remove(i);
                side_normals.remove(i);
                if self.vertices.len() < 3 {
                    self.vertices.clear();
                    return false;
                }
                if i > 0 {
                    i -= 1;
                }
                continue;
            }
            match self.classify(&self.vertices[i], &side_normals[i], false) {
                PlaneSide::Front | PlaneSide::Split => return false,
                PlaneSide::Coplanar => return false,
                PlaneSide::Back => {}
            }
            i += 1;
        }
        true
    }

    /// Splits off the second half of the vertex ring, sharing the closing edge.
    pub fn split_in_half(&mut self) -> Polygon {
        let m = self.vertices.len() / 2;
        let mut other = self.clone();
        other.vertices = self.vertices[m..].to_vec();
        other.vertices.push(self.vertices[0]);
        self.vertices.truncate(m + 1);
        self.flags |= PolyFlags::ED_CUT;
        other.flags |= PolyFlags::ED_CUT;
        other
    }

    /// Side of a plane only, without building fragments.
    pub fn classify(&self, base: &Point3, normal: &Point3, very_precise: bool) -> PlaneSide {
        let thresh = split_threshold(very_precise);
        let (min, max) = self
            .vertices
            .iter()
            .map(|v| (v - base).dot(*normal))
            .fold((Real::MAX, Real::MIN), |(min, max), d| (min.min(d), max.max(d)));

        if max < thresh && min > -thresh {
            PlaneSide::Coplanar
        } else if max < thresh {
            PlaneSide::Back
        } else if min > -thresh {
            PlaneSide::Front
        } else {
            PlaneSide::Split
        }
    }

    pub fn classify_plane(&self, plane: &PlaneF) -> PlaneSide {
        self.classify(&plane.origin(), &plane.normal, false)
    }

    /// Cuts the polygon by the plane through `base` with `normal`.
    pub fn split_with_plane(&self, base: &Point3, normal: &Point3, very_precise: bool) -> SplitResult {
        let thresh = split_threshold(very_precise);
        let dists: Vec<Real> = self
            .vertices
            .iter()
            .map(|v| (v - base).dot(*normal))
            .collect();

        let side = self.classify(base, normal, very_precise);
        if side != PlaneSide::Split {
            return match side {
                PlaneSide::Coplanar => SplitResult::Coplanar,
                PlaneSide::Back => SplitResult::Back,
                _ => SplitResult::Front,
            };
        }

        let status_of = |dist: Real, prev: VertexStatus| {
            if dist > thresh {
                VertexStatus::Front
            } else if dist < -thresh {
                VertexStatus::Back
            } else {
                prev
            }
        };
        // Start from the status of the last vertex that is clearly off the plane.
        let mut prev_status = dists
            .iter()
            .fold(VertexStatus::Either, |status, d| status_of(*d, status));

        let mut front = self.clone();
        let mut back = self.clone();
        front.flags |= PolyFlags::ED_CUT;
        back.flags |= PolyFlags::ED_CUT;
        front.vertices.clear();
        back.vertices.clear();

        let n = self.vertices.len();
        let mut j = n - 1;
        for i in 0..n {
            let dist = dists[i];
            let prev_dist = dists[j];
            let status = status_of(dist, prev_status);

            if status != prev_status {
                if prev_dist >= -thresh && prev_dist < thresh {
                    // The previous vertex sits on the plane and already belongs to the old side.
                    let target = if status == VertexStatus::Front {
                        &mut front
                    } else {
                        &mut back
                    };
                    target.vertices.push(self.vertices[j]);
                    target.vertices.push(self.vertices[i]);
                } else {
                    let cross = line_plane_intersection(&self.vertices[j], &self.vertices[i], base, normal);
                    front.vertices.push(cross);
                    back.vertices.push(cross);
                    if status == VertexStatus::Front {
                        front.vertices.push(self.vertices[i]);
                    } else {
                        back.vertices.push(self.vertices[i]);
                    }
                }
            } else if status == VertexStatus::Front {
                front.vertices.push(self.vertices[i]);
            } else {
                back.vertices.push(self.vertices[i]);
            }
            j = i;
            prev_status = status;
        }

        // Precision slivers collapse the split back to one side.
        if front.fix() < 3 {
            SplitResult::Back
        } else if back.fix() < 3 {
            SplitResult::Front
        } else {
            SplitResult::Split { front, back }
        }
    }

    pub fn split_by_plane(&self, plane: &PlaneF, very_precise: bool) -> SplitResult {
        self.split_with_plane(&plane.origin(), &plane.normal, very_precise)
    }

    pub fn bounding_box(&self) -> BoxF {
        BoxF::from_vertices(self.vertices.iter())
    }
}

fn split_threshold(very_precise: bool) -> Real {
    if very_precise {
        THRESH_SPLIT_POLY_PRECISELY
    } else {
        THRESH_SPLIT_POLY_WITH_PLANE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::vec3;

    fn square(z: Real) -> Polygon {
        Polygon::from_vertices(vec![
            vec3(-1.0, -1.0, z),
            vec3(1.0, -1.0, z),
            vec3(1.0, 1.0, z),
            vec3(-1.0, 1.0, z),
        ])
    }

    #[test]
    fn normal_follows_counter_clockwise_winding() {
        let poly = square(0.0);
        assert!((poly.normal - Vector3::unit_z()).magnitude() < 1e-12);
        assert!((poly.area() - 4.0).abs() < 1e-12);
        let (u, v) = find_best_axis_vectors(&poly.normal);
        assert!((u.cross(v) - poly.normal).magnitude() < 1e-12);
    }

    #[test]
    fn split_fragments_lie_on_their_sides() {
        let poly = square(0.0);
        let base = vec3(0.25, 0.0, 0.0);
        let normal = vec3(1.0, 0.0, 0.0);
        match poly.split_with_plane(&base, &normal, false) {
            SplitResult::Split { front, back } => {
                assert!(front.flags.contains(PolyFlags::ED_CUT));
                for v in front.vertices.iter() {
                    assert!((v - base).dot(normal) >= -THRESH_SPLIT_POLY_WITH_PLANE);
                }
                for v in back.vertices.iter() {
                    assert!((v - base).dot(normal) <= THRESH_SPLIT_POLY_WITH_PLANE);
                }
                assert_eq!(front.vertices.len(), 4);
                assert_eq!(back.vertices.len(), 4);
                assert!((front.area() + back.area() - poly.area()).abs() < 1e-9);
                // Exactly one new shared edge, on the plane.
                let on_plane = |p: &Polygon| {
                    p.vertices
                        .iter()
                        .filter(|v| ((*v - base).dot(normal)).abs() < 1e-9)
                        .count()
                };
                assert_eq!(on_plane(&front), 2);
                assert_eq!(on_plane(&back), 2);
            }
            other => panic!("expected split, got {:?}", other.side()),
        }
    }

    #[test]
    fn split_through_vertices_reuses_them() {
        let poly = square(0.0);
        // Diagonal through (-1,-1) and (1,1).
        let normal = vec3(1.0, -1.0, 0.0).normalize();
        match poly.split_with_plane(&vec3(0.0, 0.0, 0.0), &normal, true) {
            SplitResult::Split { front, back } => {
                assert_eq!(front.vertices.len(), 3);
                assert_eq!(back.vertices.len(), 3);
            }
            other => panic!("expected split, got {:?}", other.side()),
        }
    }

    #[test]
    fn classification_outside_band() {
        let poly = square(0.0);
        let up = Vector3::unit_z();
        assert_eq!(poly.classify(&vec3(0.0, 0.0, 0.0), &up, false), PlaneSide::Coplanar);
        assert_eq!(poly.classify(&vec3(0.0, 0.0, -1.0), &up, false), PlaneSide::Front);
        assert_eq!(poly.classify(&vec3(0.0, 0.0, 1.0), &up, false), PlaneSide::Back);
        // A sliver thinner than the band is not split.
        let normal = vec3(1.0, 0.0, 0.0);
        assert!(matches!(
            poly.split_with_plane(&vec3(0.995, 0.0, 0.0), &normal, false),
            SplitResult::Back
        ));
    }

    #[test]
    fn fix_drops_duplicates_and_degenerates() {
        let mut poly = square(0.0);
        poly.vertices.insert(1, vec3(-1.0, -1.0005, 0.0));
        poly.vertices.push(vec3(-1.0, -1.0, 0.0));
        assert_eq!(poly.fix(), 4);

        let mut sliver = square(0.0);
        sliver.vertices = vec![vec3(0.0, 0.0, 0.0), vec3(0.0005, 0.0, 0.0), vec3(1.0, 0.0, 0.0)];
        assert_eq!(sliver.fix(), 0);
    }

    #[test]
    fn colinear_vertices_are_removed() {
        let mut poly = square(0.0);
        poly.vertices.insert(1, vec3(0.0, -1.0, 0.0));
        assert!(poly.remove_colinears());
        assert_eq!(poly.vertices.len(), 4);

        let mut concave = square(0.0);
        concave.vertices.insert(1, vec3(0.0, 0.5, 0.0));
        assert!(!concave.remove_colinears());
    }

    #[test]
    fn split_in_half_shares_an_edge() {
        let mut poly = Polygon::from_vertices(
            (0..6)
                .map(|i| {
                    let a = i as Real * std::f64::consts::PI / 3.0;
                    vec3(a.cos(), a.sin(), 0.0)
                })
                .collect(),
        );
        let other = poly.split_in_half();
        assert_eq!(poly.vertices.len(), 4);
        assert_eq!(other.vertices.len(), 4);
        assert_eq!(poly.vertices[0], other.vertices[3]);
        assert_eq!(poly.vertices[3], other.vertices[0]);
    }

    #[test]
    fn collapsed_and_colinear_polygons_are_degenerate() {
        assert!(!square(0.0).is_degenerate());

        let collapsed = Polygon::from_vertices(vec![vec3(0.0, 0.0, 0.0), vec3(1.0, 0.0, 0.0), vec3(1.0, 0.0, 0.0)]);
        assert!(collapsed.vertices.is_empty());
        assert!(collapsed.is_degenerate());

        let line = Polygon::from_vertices(vec![vec3(0.0, 0.0, 0.0), vec3(0.1, 0.0, 0.0), vec3(0.2, 0.0, 0.0)]);
        assert_eq!(line.vertices.len(), 3);
        assert!(line.is_degenerate());
    }

    #[test]
    fn infinite_polygon_keeps_orientation() {
        let plane = PlaneF::from_point_normal(&vec3(0.0, 0.0, 3.0), &vec3(0.0, 1.0, 0.0));
        let mut poly = Polygon::infinite(&plane);
        let normal = poly.normal;
        assert!(poly.calc_normal());
        assert!((poly.normal - normal).magnitude() < 1e-9);
        assert!(poly.vertices.iter().all(|v| plane.distance_to(v).abs() < 1e-6));
    }
}
