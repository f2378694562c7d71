use bsp::dedup::{PointGrid, CELL_SIZE};
use bsp::model::*;
use bsp::types::*;
use cgmath::InnerSpace;
use log::{debug, info};

use crate::context::BuildContext;
use crate::refresh::refresh;

/// Points closer than this are welded before T-junctions are fixed.
pub const MERGE_NEAR_POINTS_DIST: Real = 0.01;

/// Side ids below this are reserved for view-clipped sides.
const RESERVED_SIDES: u32 = 4;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptimizeReport {
    /// Sides no other node shared before distribution.
    pub tees: usize,
    /// Points inserted into node rings.
    pub distributed: usize,
    pub linked_sides: usize,
    pub total_sides: usize,
    pub errors: u32,
}

/// Which node rings use each point, and at which slot.
struct PointVerts {
    index: Vec<Vec<(usize, usize)>>,
}

impl PointVerts {
    fn new(model: &Model) -> PointVerts {
        let mut pv = PointVerts {
            index: vec![Vec::new(); model.points.len()],
        };
        for node in 0..model.nodes.len() {
            pv.add_node(model, node);
        }
        pv
    }

    fn add_node(&mut self, model: &Model, node: usize) {
        for (slot, vert) in model.node_vertices(&model.nodes[node]).iter().enumerate() {
            if let Some(users) = self.index.get_mut(vert.point.index()) {
                users.push((node, slot));
            }
        }
    }

    fn remove_node(&mut self, model: &Model, node: usize) {
        for vert in model.node_vertices(&model.nodes[node]).iter() {
            if let Some(users) = self.index.get_mut(vert.point.index()) {
                users.retain(|&(n, _)| n != node);
            }
        }
    }

    fn users(&self, point: PointIndex) -> &[(usize, usize)] {
        self.index.get(point.index()).map_or(&[], |u| u.as_slice())
    }

    /// Whether a node other than `except` has both points.
    fn is_shared(&self, a: PointIndex, b: PointIndex, except: usize) -> bool {
        self.users(a)
            .iter()
            .any(|&(n1, _)| n1 != except && self.users(b).iter().any(|&(n2, _)| n2 == n1))
    }
}

/// Welds points closer than `dist` to the first earlier point in range and removes the
/// duplicate vertices that leaves in node rings. Rings under three vertices are emptied.
pub fn merge_near_points(model: &mut Model, dist: Real) -> usize {
    let mut remap: Vec<usize> = (0..model.points.len()).collect();
    if dist <= CELL_SIZE {
        let grid = PointGrid::from_table(&model.points);
        for (i, p) in model.points.iter().enumerate() {
            if let Some(j) = grid.find_within(&model.points, p, dist) {
                remap[i] = j.min(i);
            }
        }
    } else {
        for i in 0..model.points.len() {
            if let Some(j) = (0..i).find(|&j| (model.points[j] - model.points[i]).magnitude2() < dist * dist) {
                remap[i] = j;
            }
        }
    }
    let merged = remap.iter().enumerate().filter(|(i, j)| i != *j).count();

    let map = |p: PointIndex| PointIndex::from_index(remap.get(p.index()).copied().unwrap_or(p.index()));
    for vert in model.verts.iter_mut() {
        vert.point = map(vert.point);
    }
    for surface in model.surfaces.iter_mut() {
        surface.base = map(surface.base);
    }

    let mut collapsed = 0;
    for node in model.nodes.iter_mut() {
        let start = node.vert_pool.index();
        let Some(pool) = model.verts.get_mut(start..start + node.num_vertices as usize) else {
            continue;
        };
        let ring: Vec<Vert> = pool.to_vec();
        let mut kept = 0;
        for (j, vert) in ring.iter().enumerate() {
            let prev = &ring[if j > 0 { j - 1 } else { ring.len() - 1 }];
            if vert.point != prev.point {
                pool[kept] = *vert;
                kept += 1;
            }
        }
        if kept < 3 {
            node.num_vertices = 0;
            collapsed += 1;
        } else {
            node.num_vertices = kept as u8;
        }
    }
    model.invalidate_lookups();
    debug!("Welded {} points, collapsed {} nodes", merged, collapsed);
    merged
}

/// Inserts `point` into the ring of `node` before `slot`. Refuses when the ring is full.
fn add_point_to_node(model: &mut Model, pv: &mut PointVerts, node: usize, slot: usize, point: PointIndex) -> bool {
    let n = &model.nodes[node];
    if n.num_vertices as usize + 1 >= MAX_NODE_VERTICES {
        return false;
    }
    pv.remove_node(model, node);
    let mut ring = model.node_vertices(&model.nodes[node]).to_vec();
    ring.insert(slot.min(ring.len()), Vert { point, side: None });

    let n = &mut model.nodes[node];
    n.vert_pool = VertIndex::from_index(model.verts.len());
    n.num_vertices = ring.len() as u8;
    model.verts.extend(ring);
    pv.add_node(model, node);
    true
}

/// Pushes `point` down the tree and inserts it into every coplanar ring whose side
/// it lies on. Returns the number of insertions.
fn distribute_point(
    model: &mut Model,
    ctx: &mut BuildContext,
    pv: &mut PointVerts,
    node: NodeIndex,
    point: PointIndex,
    depth: u32,
) -> BspResult<usize> {
    if !ctx.can_descend(depth, "Distributing points") {
        return Ok(0);
    }
    let p = *model
        .points
        .get(point.index())
        .ok_or_else(|| BspError::from(format!("Point {} out of range", point)))?;
    let n = model.node(node)?.clone();
    let dist = n.plane.distance_to(&p);

    let mut count = 0;
    if dist < THRESH_OPTGEOM_COPLANAR {
        if let Some(back) = n.back {
            count += distribute_point(model, ctx, pv, back, point, depth + 1)?;
        }
    }
    if dist > -THRESH_OPTGEOM_COPLANAR {
        if let Some(front) = n.front {
            count += distribute_point(model, ctx, pv, front, point, depth + 1)?;
        }
    }
    if dist.abs() >= THRESH_OPTGEOM_COPLANAR {
        return Ok(count);
    }

    let mut current = Some(node);
    while let Some(index) = current {
        let cn = model.node(index)?;
        current = cn.coplanar;
        let normal = cn.plane.normal;
        let ring: Vec<Point3> = model.node_points(cn).collect();
        if model.node_vertices(cn).iter().any(|v| v.point == point) {
            continue;
        }

        let mut found = None;
        let mut outside = false;
        let mut skipped_colinear = false;
        let mut skipped_inside = false;
        for i in 0..ring.len() {
            let j = if i > 0 { i - 1 } else { ring.len() - 1 };
            let side = ring[i] - ring[j];
            let side_normal = side.cross(normal);
            let size2 = side_normal.magnitude2();
            if size2 <= 0.001 * 0.001 {
                ctx.geometry_error("Tiny side while distributing a point");
                continue;
            }
            let d = (p - ring[i]).dot(side_normal) / size2.sqrt();
            if d >= THRESH_OPTGEOM_COSIDAL {
                outside = true;
                break;
            } else if d > -THRESH_OPTGEOM_COSIDAL {
                let mid = (ring[i] + ring[j]) * 0.5;
                if (p - mid).magnitude2() <= 0.501 * 0.501 * side.magnitude2() {
                    found = Some(i);
                } else {
                    skipped_colinear = true;
                }
            } else {
                skipped_inside = true;
            }
        }
        if outside {
            continue;
        }
        match found {
            Some(slot) => {
                if add_point_to_node(model, pv, index.index(), slot, point) {
                    count += 1;
                }
            }
            None if skipped_colinear => ctx.geometry_error("Point is colinear with a side but past its ends"),
            None if skipped_inside => ctx.geometry_error("Point lies inside a polygon"),
            None => {}
        }
    }
    Ok(count)
}

/// Welds near points, removes T-junctions and links every node side to the opposite
/// side of its neighbour.
pub fn optimize_geometry(model: &mut Model, ctx: &mut BuildContext) -> BspResult<OptimizeReport> {
    let errors_before = ctx.errors;
    let mut report = OptimizeReport::default();

    merge_near_points(model, MERGE_NEAR_POINTS_DIST);
    refresh(model, false)?;
    let Some(root) = model.root() else {
        return Ok(report);
    };

    let mut pv = PointVerts::new(model);
    model.num_shared_sides = RESERVED_SIDES;
    for vert in model.verts.iter_mut() {
        vert.side = None;
    }

    for node in 0..model.nodes.len() {
        let mut this = 0;
        while this < model.nodes[node].num_vertices as usize {
            let ring = model.node_vertices(&model.nodes[node]);
            let prev = if this > 0 { this - 1 } else { ring.len() - 1 };
            let (this_point, prev_point) = (ring[this].point, ring[prev].point);
            if !pv.is_shared(this_point, prev_point, node) {
                report.tees += 1;
                report.distributed += distribute_point(model, ctx, &mut pv, root, this_point, 0)?;
                report.distributed += distribute_point(model, ctx, &mut pv, root, prev_point, 0)?;
            }
            this += 1;
        }
    }

    // Side `i` of a ring runs from vertex `i - 1` to vertex `i`.
    let pv = PointVerts::new(model);
    for node in 0..model.nodes.len() {
        let start = model.nodes[node].vert_pool.index();
        let count = model.nodes[node].num_vertices as usize;
        for this in 0..count {
            if model.verts[start + this].side.is_some() {
                continue;
            }
            let prev = if this > 0 { this - 1 } else { count - 1 };
            let this_point = model.verts[start + this].point;
            let prev_point = model.verts[start + prev].point;

            let mut other_vert = None;
            'search: for &(node1, slot1) in pv.users(this_point) {
                for &(node2, slot2) in pv.users(prev_point) {
                    if node1 != node2 || node1 == node {
                        continue;
                    }
                    let other = &model.nodes[node2];
                    let other_count = other.num_vertices as usize;
                    // The neighbour must walk the same edge the other way round.
                    if (other_count + slot2 - slot1) % other_count == 1 {
                        other_vert = Some(other.vert_pool.index() + slot2);
                        break 'search;
                    }
                }
            }

            match other_vert {
                Some(other_vert) => {
                    let side = match model.verts[other_vert].side {
                        Some(side) => side,
                        None => {
                            model.num_shared_sides += 1;
                            SideIndex::new(model.num_shared_sides - 1)
                        }
                    };
                    model.verts[start + this].side = Some(side);
                    model.verts[other_vert].side = Some(side);
                }
                None => ctx.geometry_error("Failed to link side"),
            }
        }
    }

    for node in model.nodes.iter() {
        let ring = model.node_vertices(node);
        report.total_sides += ring.len();
        report.linked_sides += ring.iter().filter(|v| v.side.is_some()).count();
    }
    refresh(model, false)?;
    report.errors = ctx.errors - errors_before;
    info!(
        "Processed {} T-points, linked {}/{} sides",
        report.tees, report.linked_sides, report.total_sides
    );
    Ok(report)
}
