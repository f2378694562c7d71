use crate::dedup::PointGrid;
use crate::io::*;
use crate::io::{Readable, Writable};
use crate::poly::*;
use crate::types::*;
use bsp_derive::{Readable, Writable};
use bytes::{Buf, BufMut};
use typed_ints::TypedInt;

typed_int!(NodeIndex, _NodeIndex, u32);
typed_int!(SurfaceIndex, _SurfaceIndex, u32);
typed_int!(PointIndex, _PointIndex, u32);
typed_int!(VectorIndex, _VectorIndex, u32);
typed_int!(VertIndex, _VertIndex, u32);
typed_int!(SideIndex, _SideIndex, u32);
typed_int!(LeafIndex, _LeafIndex, u32);
typed_int!(HullIndex, _HullIndex, u32);
typed_int!(BoundIndex, _BoundIndex, u32);

bitflags! {
    pub struct NodeFlags: u8 {
        /// Added by the CSG operation in progress.
        const IS_NEW = 0b1;
        /// Does not separate solid from empty space.
        const NOT_CSG = 0b10;
        /// Does not block visibility.
        const NOT_VIS_BLOCKING = 0b100;
    }
}

bitflags_io!(NodeFlags, u8);

bitflags! {
    /// What `Model::empty_model` clears beyond the derived tree.
    pub struct EmptyFlags: u8 {
        const SURFACE_INFO = 0b1;
        const POLYS = 0b10;
        const ALL = Self::SURFACE_INFO.bits | Self::POLYS.bits;
    }
}

/// Where a node hangs relative to its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodePlace {
    Back,
    Front,
    Plane,
    Root,
}

#[derive(Debug, Clone, PartialEq, Readable, Writable)]
pub struct Node {
    pub plane: PlaneF,
    pub zone_mask: u64,
    pub flags: NodeFlags,
    pub vert_pool: VertIndex,
    pub surface: SurfaceIndex,
    pub back: Option<NodeIndex>,
    pub front: Option<NodeIndex>,
    pub coplanar: Option<NodeIndex>,
    pub collision_bound: Option<HullIndex>,
    pub render_bound: Option<BoundIndex>,
    /// Zone on the back `[0]` and front `[1]` side.
    pub zone: [u8; 2],
    pub num_vertices: u8,
    /// Leaf on the back `[0]` and front `[1]` side, when that side is empty.
    pub leaf: [Option<LeafIndex>; 2],
}

#[derive(Debug, Clone, PartialEq, Readable, Writable)]
pub struct Surface {
    pub plane: PlaneF,
    pub base: PointIndex,
    pub normal: VectorIndex,
    pub texture_u: VectorIndex,
    pub texture_v: VectorIndex,
    pub flags: PolyFlags,
    pub material: u32,
    pub brush_poly: Option<BrushPolyIndex>,
}

#[derive(Debug, Clone, Copy, PartialEq, Readable, Writable)]
pub struct Vert {
    pub point: PointIndex,
    pub side: Option<SideIndex>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Readable, Writable)]
pub struct Zone {
    pub connectivity: u64,
    pub visibility: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Readable, Writable)]
pub struct Leaf {
    pub zone: u8,
    pub visible_zones: u64,
}

/// One bounding face of a leaf hull: the partitioning plane of `node`, seen from
/// its front or back side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Readable, Writable)]
pub struct HullFace {
    pub node: NodeIndex,
    pub front: bool,
}

#[derive(Debug, Clone, PartialEq, Readable, Writable)]
pub struct LeafHull {
    pub faces: Vec<HullFace>,
    pub bound: BoxF,
}

/// Lightmap placement for a surface. Geometry code only keeps the surface link valid.
#[derive(Debug, Clone, PartialEq, Readable, Writable)]
pub struct LightmapInfo {
    pub surface: SurfaceIndex,
    pub data_offset: u32,
    pub size_u: u32,
    pub size_v: u32,
    pub pan: Point3,
    pub u_scale: Real,
    pub v_scale: Real,
}

#[derive(Debug, Clone, Readable, Writable)]
pub struct Model {
    pub bound: BoxF,
    pub bounds: Vec<BoxF>,
    pub vectors: Vec<Point3>,
    pub points: Vec<Point3>,
    pub nodes: Vec<Node>,
    pub surfaces: Vec<Surface>,
    pub verts: Vec<Vert>,
    pub num_shared_sides: u32,
    pub zones: Vec<Zone>,
    pub polys: Vec<Polygon>,
    pub leaf_hulls: Vec<LeafHull>,
    pub leaves: Vec<Leaf>,
    pub root_outside: bool,
    pub linked: bool,
    pub portal_nodes: Vec<NodeIndex>,
    pub lightmaps: Vec<LightmapInfo>,

    #[io(skip)]
    point_grid: PointGrid,
    #[io(skip)]
    vector_grid: PointGrid,
}

impl Node {
    /// Whether this node separates solid from empty space, ignoring nodes with `extra` set.
    pub fn is_csg(&self, extra: NodeFlags) -> bool {
        self.num_vertices > 0
            && !self
                .flags
                .intersects(NodeFlags::IS_NEW | NodeFlags::NOT_CSG | extra)
    }

    /// Outside-ness of the front or back child region given the outside-ness of this node's region.
    pub fn child_outside(&self, front: bool, outside: bool, extra: NodeFlags) -> bool {
        if front {
            outside || self.is_csg(extra)
        } else {
            outside && !self.is_csg(extra)
        }
    }

    pub fn child(&self, front: bool) -> Option<NodeIndex> {
        if front {
            self.front
        } else {
            self.back
        }
    }

    pub fn child_mut(&mut self, front: bool) -> &mut Option<NodeIndex> {
        if front {
            &mut self.front
        } else {
            &mut self.back
        }
    }
}

impl Default for Model {
    fn default() -> Self {
        Model::new(true)
    }
}

impl Model {
    pub fn new(root_outside: bool) -> Model {
        Model {
            bound: BoxF::empty(),
            bounds: vec![],
            vectors: vec![],
            points: vec![],
            nodes: vec![],
            surfaces: vec![],
            verts: vec![],
            num_shared_sides: 0,
            zones: vec![],
            polys: vec![],
            leaf_hulls: vec![],
            leaves: vec![],
            root_outside,
            linked: false,
            portal_nodes: vec![],
            lightmaps: vec![],
            point_grid: PointGrid::default(),
            vector_grid: PointGrid::default(),
        }
    }

    /// A model whose staging list holds `polys`.
    pub fn from_polys(polys: Vec<Polygon>, root_outside: bool) -> Model {
        let mut model = Model::new(root_outside);
        model.polys = polys;
        model.build_bound();
        model
    }

    /// Clears the derived tree. Point/vector/surface tables and the staging
    /// polygons are kept unless `flags` asks for them.
    pub fn empty_model(&mut self, flags: EmptyFlags) {
        self.nodes.clear();
        self.verts.clear();
        self.leaf_hulls.clear();
        self.bounds.clear();
        self.leaves.clear();
        self.portal_nodes.clear();
        self.lightmaps.clear();
        self.zones.clear();
        self.num_shared_sides = 0;

        if flags.contains(EmptyFlags::SURFACE_INFO) {
            self.vectors.clear();
            self.points.clear();
            self.surfaces.clear();
            self.invalidate_lookups();
        }
        if flags.contains(EmptyFlags::POLYS) {
            self.polys.clear();
        }
    }

    pub fn num_zones(&self) -> usize {
        self.zones.len()
    }

    pub fn root(&self) -> Option<NodeIndex> {
        if self.nodes.is_empty() {
            None
        } else {
            Some(NodeIndex::new(0))
        }
    }

    pub fn node(&self, index: NodeIndex) -> BspResult<&Node> {
        self.nodes
            .get(index.index())
            .ok_or_else(|| BspError::from(format!("Node {} out of range", index)))
    }

    pub fn node_mut(&mut self, index: NodeIndex) -> BspResult<&mut Node> {
        self.nodes
            .get_mut(index.index())
            .ok_or_else(|| BspError::from(format!("Node {} out of range", index)))
    }

    pub fn surface(&self, index: SurfaceIndex) -> BspResult<&Surface> {
        self.surfaces
            .get(index.index())
            .ok_or_else(|| BspError::from(format!("Surface {} out of range", index)))
    }

    /// The span of the vertex pool belonging to `node`.
    pub fn node_vertices(&self, node: &Node) -> &[Vert] {
        let start = node.vert_pool.index();
        self.verts
            .get(start..start + node.num_vertices as usize)
            .unwrap_or(&[])
    }

    pub fn node_points<'a>(&'a self, node: &'a Node) -> impl Iterator<Item = Point3> + 'a {
        self.node_vertices(node)
            .iter()
            .filter_map(move |v| self.points.get(v.point.index()).copied())
    }

    /// Zone membership mask of the subtree under `node`.
    pub fn zone_mask(&self, node: NodeIndex) -> u64 {
        self.nodes.get(node.index()).map_or(0, |n| n.zone_mask)
    }

    pub fn collision_bound(&self, node: NodeIndex) -> Option<&LeafHull> {
        let hull = self.nodes.get(node.index())?.collision_bound?;
        self.leaf_hulls.get(hull.index())
    }

    /// Rebuilds the editable polygon of a node from its surface and vertex pool.
    pub fn node_polygon(&self, node: NodeIndex) -> Option<Polygon> {
        let n = self.nodes.get(node.index())?;
        let surf = self.surfaces.get(n.surface.index())?;
        let vertices: Vec<Point3> = self.node_points(n).collect();
        if vertices.len() < 3 {
            return None;
        }
        let mut poly = Polygon {
            vertices,
            base: *self.points.get(surf.base.index())?,
            normal: *self.vectors.get(surf.normal.index())?,
            texture_u: *self.vectors.get(surf.texture_u.index())?,
            texture_v: *self.vectors.get(surf.texture_v.index())?,
            flags: surf.flags - PolyFlags::TRANSIENT,
            material: surf.material,
            link: Some(LinkIndex::from_index(n.surface.index())),
            brush_poly: surf.brush_poly,
        };
        // T-junction points show up as colinear vertices.
        poly.remove_colinears();
        if poly.vertices.len() < 3 {
            None
        } else {
            Some(poly)
        }
    }

    /// Walks the tree to decide whether `point` lies in empty space.
    pub fn point_outside(&self, point: &Point3) -> bool {
        let mut outside = self.root_outside;
        let mut current = self.root();
        while let Some(index) = current {
            let node = match self.nodes.get(index.index()) {
                Some(node) => node,
                None => break,
            };
            let front = node.plane.distance_to(point) > 0.0;
            outside = node.child_outside(front, outside, NodeFlags::empty());
            current = node.child(front);
        }
        outside
    }

    /// Index of a point equal to `p` within the point threshold, adding it if new.
    pub fn add_point(&mut self, p: &Point3, exact: bool) -> PointIndex {
        let thresh = if exact {
            THRESH_POINTS_ARE_SAME
        } else {
            THRESH_POINTS_ARE_NEAR
        };
        if self.point_grid.len() != self.points.len() {
            self.point_grid = PointGrid::from_table(&self.points);
        }
        if let Some(found) = self.point_grid.find(&self.points, p, thresh) {
            return PointIndex::from_index(found);
        }
        let index = self.points.len();
        self.points.push(*p);
        self.point_grid.insert(p, index);
        PointIndex::from_index(index)
    }

    /// Index of a direction equal to `v` within the vector threshold, adding it if new.
    pub fn add_vector(&mut self, v: &Point3, exact: bool) -> VectorIndex {
        let thresh = if exact {
            THRESH_NORMALS_ARE_SAME
        } else {
            THRESH_VECTORS_ARE_NEAR
        };
        if self.vector_grid.len() != self.vectors.len() {
            self.vector_grid = PointGrid::from_table(&self.vectors);
        }
        if let Some(found) = self.vector_grid.find(&self.vectors, v, thresh) {
            return VectorIndex::from_index(found);
        }
        let index = self.vectors.len();
        self.vectors.push(*v);
        self.vector_grid.insert(v, index);
        VectorIndex::from_index(index)
    }

    /// Must be called after the point or vector tables are rewritten in place.
    pub fn invalidate_lookups(&mut self) {
        self.point_grid.clear();
        self.vector_grid.clear();
    }

    /// Box around every staging polygon.
    pub fn build_bound(&mut self) {
        self.bound = BoxF::from_vertices(self.polys.iter().flat_map(|p| p.vertices.iter()));
    }

    pub fn save(&self, to: &mut dyn BufMut) -> BspResult<()> {
        let version = Version::new();
        version.model.write(to, &version)?;
        self.write(to, &version)
    }

    pub fn load(from: &mut dyn Buf) -> BspResult<Model> {
        let mut version = Version::new();
        version.model = u32::read(from, &mut version)?;
        if !version.is_supported() {
            return Err(BspError::from(format!(
                "Unsupported model format {}",
                version.model
            )));
        }
        Model::read(from, &mut version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::vec3;

    #[test]
    fn add_point_merges_near_duplicates() {
        let mut model = Model::default();
        let a = model.add_point(&vec3(1.0, 2.0, 3.0), true);
        let b = model.add_point(&vec3(1.001, 2.0, 3.0), true);
        let c = model.add_point(&vec3(1.01, 2.0, 3.0), true);
        let d = model.add_point(&vec3(1.01, 2.0, 3.0), false);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(d, a);
        assert_eq!(model.points.len(), 2);

        let n = model.add_vector(&vec3(0.0, 0.0, 1.0), true);
        assert_eq!(model.add_vector(&vec3(0.0, 0.00001, 1.0), true), n);
        assert_ne!(model.add_vector(&vec3(0.0, 0.0001, 1.0), true), n);
    }

    #[test]
    fn empty_model_is_selective() {
        let mut model = Model::default();
        model.add_point(&vec3(0.0, 0.0, 0.0), true);
        model.polys.push(Polygon::from_vertices(vec![
            vec3(0.0, 0.0, 0.0),
            vec3(1.0, 0.0, 0.0),
            vec3(0.0, 1.0, 0.0),
        ]));
        model.zones.push(Zone::default());

        model.empty_model(EmptyFlags::empty());
        assert_eq!(model.points.len(), 1);
        assert_eq!(model.polys.len(), 1);
        assert_eq!(model.num_zones(), 0);

        model.empty_model(EmptyFlags::SURFACE_INFO);
        assert!(model.points.is_empty());
        assert_eq!(model.polys.len(), 1);

        model.empty_model(EmptyFlags::ALL);
        assert!(model.polys.is_empty());
    }

    #[test]
    fn empty_tree_classifies_by_root() {
        assert!(Model::new(true).point_outside(&vec3(0.0, 0.0, 0.0)));
        assert!(!Model::new(false).point_outside(&vec3(0.0, 0.0, 0.0)));
    }

    #[test]
    fn unsupported_format_is_rejected() {
        let mut buf = Vec::new();
        let version = Version::new();
        99u32.write(&mut buf, &version).unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        assert!(Model::load(&mut cursor).is_err());
    }
}
