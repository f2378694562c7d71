use bsp::model::*;
use bsp::poly::{Polygon, SplitResult};
use bsp::types::*;
use cgmath::vec3;

use crate::brush::box_faces;
use crate::context::BuildContext;

/// A face of the cell being filtered, tagged with the partitioner it came from.
#[derive(Debug, Clone)]
struct BoundPoly {
    poly: Polygon,
    face: Option<HullFace>,
}

/// Recomputes `zone_mask` for the subtree under `node` and returns it.
pub fn build_zone_masks(model: &mut Model, ctx: &mut BuildContext, node: NodeIndex, depth: u32) -> BspResult<u64> {
    if !ctx.can_descend(depth, "Zone masks") {
        return Ok(0);
    }
    let n = model.node(node)?.clone();
    let mut mask = 0u64;
    for zone in n.zone.iter().filter(|z| **z != 0) {
        mask |= 1u64.checked_shl(*zone as u32).unwrap_or(0);
    }
    for child in [n.front, n.back, n.coplanar].into_iter().flatten() {
        mask |= build_zone_masks(model, ctx, child, depth + 1)?;
    }
    model.node_mut(node)?.zone_mask = mask;
    Ok(mask)
}

/// Rebuilds render bounds, collision hulls and zone masks for the whole tree.
///
/// The world cube is pushed down the tree. Empty cells grow the render bound of every
/// node above them; each solid cell becomes a leaf hull owned by the node whose
/// missing child it is.
pub fn build_bounds(model: &mut Model, ctx: &mut BuildContext) -> BspResult<()> {
    model.leaf_hulls.clear();
    model.bounds.clear();
    let Some(root) = model.root() else {
        return Ok(());
    };
    build_zone_masks(model, ctx, root, 0)?;
    for node in model.nodes.iter_mut() {
        node.collision_bound = None;
        node.render_bound = None;
    }

    let world = BoxF {
        min: vec3(-HALF_WORLD_MAX, -HALF_WORLD_MAX, -HALF_WORLD_MAX),
        max: vec3(HALF_WORLD_MAX, HALF_WORLD_MAX, HALF_WORLD_MAX),
    };
    let polys = box_faces(&world)
        .into_iter()
        .map(|poly| BoundPoly { poly, face: None })
        .collect();
    let mut bound = BoxF::empty();
    let outside = model.root_outside;
    filter_bound(model, ctx, &mut bound, root, polys, outside, 0)
}

fn filter_bound(
    model: &mut Model,
    ctx: &mut BuildContext,
    parent_bound: &mut BoxF,
    node: NodeIndex,
    polys: Vec<BoundPoly>,
    outside: bool,
    depth: u32,
) -> BspResult<()> {
    if !ctx.can_descend(depth, "Bounds") {
        return Ok(());
    }
    let n = model.node(node)?.clone();
    let base = n.plane.origin();
    let normal = n.plane.normal;

    let mut front = Vec::new();
    let mut back = Vec::new();
    for bp in polys.iter() {
        match bp.poly.split_with_plane(&base, &normal, false) {
            SplitResult::Coplanar => {
                front.push(bp.clone());
                back.push(bp.clone());
            }
            SplitResult::Front => front.push(bp.clone()),
            SplitResult::Back => back.push(bp.clone()),
            SplitResult::Split {
                front: front_half,
                back: back_half,
            } => {
                front.push(BoundPoly {
                    poly: front_half,
                    face: bp.face,
                });
                back.push(BoundPoly {
                    poly: back_half,
                    face: bp.face,
                });
            }
        }
    }

    // Close both halves with the partitioner clipped to the cell.
    if !front.is_empty() && !back.is_empty() {
        if let Some(cap) = clip_partitioner(&n.plane, &polys) {
            front.push(BoundPoly {
                poly: cap.reversed(),
                face: Some(HullFace { node, front: true }),
            });
            back.push(BoundPoly {
                poly: cap,
                face: Some(HullFace { node, front: false }),
            });
        }
    }

    let mut bound = BoxF::empty();
    for (is_front, list) in [(true, front), (false, back)] {
        if list.is_empty() {
            continue;
        }
        let child_outside = n.child_outside(is_front, outside, NodeFlags::empty());
        match n.child(is_front) {
            Some(child) => filter_bound(model, ctx, &mut bound, child, list, child_outside, depth + 1)?,
            None if child_outside => {
                for bp in list.iter() {
                    bound = bound.union(&bp.poly.bounding_box());
                }
            }
            None => add_leaf_hull(model, node, &list)?,
        }
    }

    if bound.is_valid() {
        model.node_mut(node)?.render_bound = Some(BoundIndex::from_index(model.bounds.len()));
        model.bounds.push(bound);
    }
    *parent_bound = parent_bound.union(&bound);
    Ok(())
}

/// The part of `plane` inside the cell bounded by `polys`.
fn clip_partitioner(plane: &PlaneF, polys: &[BoundPoly]) -> Option<Polygon> {
    let mut cap = Polygon::infinite(plane);
    for bp in polys.iter() {
        let Some(v0) = bp.poly.vertices.first() else {
            continue;
        };
        match cap.split_with_plane(v0, &bp.poly.normal, false) {
            SplitResult::Coplanar | SplitResult::Back => {}
            SplitResult::Front => return None,
            SplitResult::Split { back, .. } => cap = back,
        }
    }
    Some(cap)
}

fn add_leaf_hull(model: &mut Model, node: NodeIndex, polys: &[BoundPoly]) -> BspResult<()> {
    let mut faces: Vec<HullFace> = Vec::new();
    let mut bound = BoxF::empty();
    for bp in polys.iter() {
        if let Some(face) = bp.face {
            if !faces.contains(&face) {
                faces.push(face);
            }
        }
        bound = bound.union(&bp.poly.bounding_box());
    }
    model.node_mut(node)?.collision_bound = Some(HullIndex::from_index(model.leaf_hulls.len()));
    model.leaf_hulls.push(LeafHull { faces, bound });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::build;
    use crate::config::BuildParams;

    #[test]
    fn solid_box_gets_a_hull() {
        let bound = BoxF {
            min: vec3(-1.0, -1.0, -1.0),
            max: vec3(1.0, 1.0, 1.0),
        };
        let mut model = Model::from_polys(box_faces(&bound), true);
        let mut ctx = BuildContext::new();
        build(&mut model, &mut ctx, &BuildParams::brush()).unwrap();

        // One solid cell behind all six planes.
        assert_eq!(model.leaf_hulls.len(), 1);
        let hull = &model.leaf_hulls[0];
        assert_eq!(hull.faces.len(), 6);
        assert!(hull.faces.iter().all(|f| !f.front));
        assert!((hull.bound.min - bound.min).x.abs() < 1e-6);
        assert!((hull.bound.max - bound.max).z.abs() < 1e-6);

        let owner = model.nodes.iter().filter(|n| n.collision_bound.is_some()).count();
        assert_eq!(owner, 1);
        let root_bound = model.nodes[0].render_bound.map(|b| model.bounds[b.index()]).unwrap();
        assert!(root_bound.contains(&vec3(HALF_WORLD_MAX - 1.0, 0.0, 0.0)));
    }

    #[test]
    fn zone_masks_cover_subtrees() {
        let bound = BoxF {
            min: vec3(-1.0, -1.0, -1.0),
            max: vec3(1.0, 1.0, 1.0),
        };
        let mut model = Model::from_polys(box_faces(&bound), true);
        let mut ctx = BuildContext::new();
        build(&mut model, &mut ctx, &BuildParams::brush()).unwrap();
        let last = model.nodes.len() - 1;
        model.nodes[last].zone = [0, 3];
        model.nodes[0].zone = [1, 0];
        let mask = build_zone_masks(&mut model, &mut ctx, NodeIndex::new(0), 0).unwrap();
        assert_eq!(mask, (1 << 1) | (1 << 3));
        assert_eq!(model.zone_mask(NodeIndex::from_index(last)), 1 << 3);
    }

    #[test]
    fn zones_past_the_mask_width_are_ignored() {
        let bound = BoxF {
            min: vec3(-1.0, -1.0, -1.0),
            max: vec3(1.0, 1.0, 1.0),
        };
        let mut model = Model::from_polys(box_faces(&bound), true);
        let mut ctx = BuildContext::new();
        build(&mut model, &mut ctx, &BuildParams::brush()).unwrap();
        // As a loaded model might carry.
        model.nodes[0].zone = [200, 63];
        let mask = build_zone_masks(&mut model, &mut ctx, NodeIndex::new(0), 0).unwrap();
        assert_eq!(mask, 1 << 63);
    }
}
