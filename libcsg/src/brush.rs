use bsp::poly::{LinkIndex, PolyFlags, Polygon};
use bsp::types::*;
use cgmath::{vec3, InnerSpace};

/// Boolean operation a brush applies to the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsgOper {
    Add,
    Subtract,
    Intersect,
    Deintersect,
}

/// A closed convex-or-concave solid given as outward facing polygons.
#[derive(Debug, Clone)]
pub struct Brush {
    pub polys: Vec<Polygon>,
    pub oper: CsgOper,
    /// Extra flags stamped on every polygon the brush contributes.
    pub flags: PolyFlags,
    /// Whether polygon links already group faces that should share a surface.
    pub linked: bool,
}

impl Brush {
    pub fn new(polys: Vec<Polygon>, oper: CsgOper) -> Brush {
        Brush {
            polys,
            oper,
            flags: PolyFlags::empty(),
            linked: false,
        }
    }

    /// Axis aligned box brush; each face is its own link group.
    pub fn cuboid(min: Point3, max: Point3, oper: CsgOper) -> Brush {
        let mut polys = box_faces(&BoxF { min, max });
        for (i, poly) in polys.iter_mut().enumerate() {
            poly.link = Some(LinkIndex::from_index(i));
        }
        Brush {
            polys,
            oper,
            flags: PolyFlags::empty(),
            linked: true,
        }
    }

    /// Cube of edge `size` centred on `center`.
    pub fn cube(center: Point3, size: Real, oper: CsgOper) -> Brush {
        let half = vec3(size, size, size) / 2.0;
        Brush::cuboid(center - half, center + half, oper)
    }

    pub fn with_flags(mut self, flags: PolyFlags) -> Brush {
        self.flags = flags;
        self
    }

    pub fn bound(&self) -> BoxF {
        BoxF::from_vertices(self.polys.iter().flat_map(|p| p.vertices.iter()))
    }

    /// Moves every vertex by `offset`.
    pub fn translate(&mut self, offset: Point3) {
        for poly in self.polys.iter_mut() {
            for vertex in poly.vertices.iter_mut() {
                *vertex += offset;
            }
            poly.base += offset;
        }
    }

    /// Whether every face points away from the brush centroid, which holds for
    /// closed convex brushes.
    pub fn is_outward(&self) -> bool {
        let center = self.bound().center();
        self.polys
            .iter()
            .all(|p| p.vertices.first().map_or(false, |v| (v - center).dot(p.normal) > 0.0))
    }
}

/// The six faces of `bound`, outward facing, in -X, +X, -Y, +Y, -Z, +Z order.
pub fn box_faces(bound: &BoxF) -> Vec<Polygon> {
    let (a, b) = (bound.min, bound.max);
    let faces = [
        [vec3(a.x, a.y, a.z), vec3(a.x, a.y, b.z), vec3(a.x, b.y, b.z), vec3(a.x, b.y, a.z)],
        [vec3(b.x, a.y, a.z), vec3(b.x, b.y, a.z), vec3(b.x, b.y, b.z), vec3(b.x, a.y, b.z)],
        [vec3(a.x, a.y, a.z), vec3(b.x, a.y, a.z), vec3(b.x, a.y, b.z), vec3(a.x, a.y, b.z)],
        [vec3(a.x, b.y, a.z), vec3(a.x, b.y, b.z), vec3(b.x, b.y, b.z), vec3(b.x, b.y, a.z)],
        [vec3(a.x, a.y, a.z), vec3(a.x, b.y, a.z), vec3(b.x, b.y, a.z), vec3(b.x, a.y, a.z)],
        [vec3(a.x, a.y, b.z), vec3(b.x, a.y, b.z), vec3(b.x, b.y, b.z), vec3(a.x, b.y, b.z)],
    ];
    faces
        .iter()
        .map(|face| Polygon::from_vertices(face.to_vec()))
        .collect()
}
