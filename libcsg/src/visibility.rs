use bsp::model::*;
use bsp::poly::{LinkIndex, PolyFlags, Polygon, SplitResult};
use bsp::types::*;
use cgmath::InnerSpace;
use log::{debug, info};

use crate::bounds::build_zone_masks;
use crate::build::add_node;
use crate::context::BuildContext;

/// Highest zone number; zone 0 is the catch-all for solid space.
pub const MAX_ZONE: usize = MAX_ZONES - 1;

/// A gap on a node's plane between an empty leaf in front and one behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Portal {
    pub node: NodeIndex,
    pub front: LeafIndex,
    pub back: LeafIndex,
    /// Covered by an author portal, so it does not join zones.
    pub blocked: bool,
}

#[derive(Debug, Clone, Default)]
pub struct VisibilityReport {
    pub leaves: usize,
    pub portals: Vec<Portal>,
    /// Zones in use, not counting zone 0.
    pub zones: usize,
    /// Node polygons cut because they span more than one zone pair.
    pub split_nodes: usize,
    pub errors: u32,
}

impl VisibilityReport {
    pub fn blocked_portals(&self) -> usize {
        self.portals.iter().filter(|p| p.blocked).count()
    }
}

/// A fragment of a polygon and the leaf it landed in, if that leaf is empty.
type Landing = (Polygon, Option<LeafIndex>);

/// The leaf containing `point`, or `None` when it lies in solid space.
pub fn leaf_at(model: &Model, point: &Point3) -> Option<LeafIndex> {
    let mut current = model.root()?;
    loop {
        let node = model.nodes.get(current.index())?;
        let front = node.plane.distance_to(point) > 0.0;
        match node.child(front) {
            Some(child) => current = child,
            None => return node.leaf[front as usize],
        }
    }
}

/// Points each coplanar node at the leaves and zones of the node heading its chain.
fn copy_to_coplanars(model: &mut Model, primary: NodeIndex) -> BspResult<()> {
    let head = model.node(primary)?.clone();
    let mut current = head.coplanar;
    while let Some(index) = current {
        let node = model.node_mut(index)?;
        let flipped = (node.plane.normal.dot(head.plane.normal) < 0.0) as usize;
        node.leaf = [head.leaf[flipped], head.leaf[1 - flipped]];
        node.zone = [head.zone[flipped], head.zone[1 - flipped]];
        current = node.coplanar;
    }
    Ok(())
}

fn assign_leaves(
    model: &mut Model,
    ctx: &mut BuildContext,
    primary_of: &mut [Option<NodeIndex>],
    node: NodeIndex,
    outside: bool,
    depth: u32,
) -> BspResult<()> {
    if !ctx.can_descend(depth, "Assigning leaves") {
        return Ok(());
    }
    let n = model.node(node)?.clone();
    let mut current = Some(node);
    while let Some(index) = current {
        primary_of[index.index()] = Some(node);
        current = model.node(index)?.coplanar;
    }

    for front in [false, true] {
        let child_outside = n.child_outside(front, outside, NodeFlags::NOT_VIS_BLOCKING);
        match n.child(front) {
            Some(child) => assign_leaves(model, ctx, primary_of, child, child_outside, depth + 1)?,
            None if child_outside => {
                let leaf = LeafIndex::from_index(model.leaves.len());
                model.leaves.push(Leaf::default());
                model.node_mut(node)?.leaf[front as usize] = Some(leaf);
            }
            None => {}
        }
    }
    copy_to_coplanars(model, node)
}

/// Filters `poly` into the front or back subtree of `owner` and collects where the
/// fragments come to rest. Fragments lying on a deeper plane go to the side facing
/// `toward`.
fn land(
    model: &Model,
    ctx: &mut BuildContext,
    owner: NodeIndex,
    front: bool,
    poly: Polygon,
    toward: &Point3,
    out: &mut Vec<Landing>,
    depth: u32,
) -> BspResult<()> {
    if !ctx.can_descend(depth, "Filtering a portal") {
        return Ok(());
    }
    let n = model.node(owner)?;
    let Some(child) = n.child(front) else {
        out.push((poly, n.leaf[front as usize]));
        return Ok(());
    };
    let c = model.node(child)?;
    match poly.split_by_plane(&c.plane, false) {
        SplitResult::Front => land(model, ctx, child, true, poly, toward, out, depth + 1),
        SplitResult::Back => land(model, ctx, child, false, poly, toward, out, depth + 1),
        SplitResult::Coplanar => {
            let side = c.plane.normal.dot(*toward) >= 0.0;
            land(model, ctx, child, side, poly, toward, out, depth + 1)
        }
        SplitResult::Split { front: f, back: b } => {
            land(model, ctx, child, true, f, toward, out, depth + 1)?;
            land(model, ctx, child, false, b, toward, out, depth + 1)
        }
    }
}

/// Every (front leaf, back leaf, fragment) pair that `poly` on the plane of `node`
/// separates. Solid sides are reported as `None`.
fn leaf_pairs(
    model: &Model,
    ctx: &mut BuildContext,
    node: NodeIndex,
    poly: Polygon,
) -> BspResult<Vec<(Option<LeafIndex>, Option<LeafIndex>, Polygon)>> {
    let normal = model.node(node)?.plane.normal;
    let mut fronts = Vec::new();
    land(model, ctx, node, true, poly, &normal, &mut fronts, 0)?;

    let mut pairs = Vec::new();
    for (fragment, front_leaf) in fronts {
        let mut backs = Vec::new();
        land(model, ctx, node, false, fragment, &-normal, &mut backs, 0)?;
        pairs.extend(backs.into_iter().map(|(piece, back_leaf)| (front_leaf, back_leaf, piece)));
    }
    Ok(pairs)
}

/// Clips the plane of every primary node to its cell and records a portal wherever
/// the clipped plane separates two empty leaves.
fn find_portals(
    model: &Model,
    ctx: &mut BuildContext,
    node: NodeIndex,
    ancestors: &mut Vec<PlaneF>,
    portals: &mut Vec<Portal>,
    depth: u32,
) -> BspResult<()> {
    if !ctx.can_descend(depth, "Finding portals") {
        return Ok(());
    }
    let n = model.node(node)?;

    // Ancestor planes are stored facing the side this node lies on.
    let mut cell = Some(Polygon::infinite(&n.plane));
    for plane in ancestors.iter() {
        cell = match cell.map(|poly| (poly.split_by_plane(plane, false), poly)) {
            Some((SplitResult::Split { front, .. }, _)) => Some(front),
            Some((SplitResult::Front | SplitResult::Coplanar, poly)) => Some(poly),
            _ => None,
        };
    }
    if let Some(cell) = cell {
        for (front, back, _) in leaf_pairs(model, ctx, node, cell)? {
            if let (Some(front), Some(back)) = (front, back) {
                if front != back {
                    portals.push(Portal {
                        node,
                        front,
                        back,
                        blocked: false,
                    });
                }
            }
        }
    }

    for front in [true, false] {
        if let Some(child) = n.child(front) {
            ancestors.push(if front { n.plane } else { n.plane.flip() });
            find_portals(model, ctx, child, ancestors, portals, depth + 1)?;
            ancestors.pop();
        }
    }
    Ok(())
}

/// Flags the generated portals covered by author-placed portal polygons.
fn block_author_portals(
    model: &Model,
    ctx: &mut BuildContext,
    primary_of: &[Option<NodeIndex>],
    portals: &mut [Portal],
) -> BspResult<usize> {
    let mut authored = 0;
    for index in 0..model.nodes.len() {
        let node = NodeIndex::from_index(index);
        let n = model.node(node)?;
        if n.num_vertices == 0 || !model.surface(n.surface)?.flags.contains(PolyFlags::PORTAL) {
            continue;
        }
        let (Some(primary), Some(poly)) = (primary_of[index], model.node_polygon(node)) else {
            continue;
        };
        authored += 1;
        for (front, back, _) in leaf_pairs(model, ctx, primary, poly)? {
            for portal in portals.iter_mut().filter(|p| p.node == primary) {
                if Some(portal.front) == front && Some(portal.back) == back {
                    portal.blocked = true;
                }
            }
        }
    }
    Ok(authored)
}

/// Numbers the distinct values of `leaf_zone` from 1 in order of first appearance,
/// folding them into `1..=MAX_ZONE`. Returns the zone of each leaf and how many
/// zones exist after folding.
fn fold_zones(leaf_zone: &[usize]) -> (Vec<u8>, usize) {
    let mut numbering: Vec<Option<usize>> = vec![None; leaf_zone.len()];
    let mut count = 0;
    let zones: Vec<u8> = leaf_zone
        .iter()
        .map(|&class| {
            let number = *numbering[class].get_or_insert_with(|| {
                count += 1;
                count
            });
            ((number - 1) % MAX_ZONE + 1) as u8
        })
        .collect();
    (zones, count.min(MAX_ZONE))
}

/// Merges the zones of leaves joined by an open portal.
fn form_zones(num_leaves: usize, portals: &[Portal]) -> (Vec<u8>, usize) {
    let mut leaf_zone: Vec<usize> = (0..num_leaves).collect();
    for portal in portals.iter().filter(|p| !p.blocked) {
        let keep = leaf_zone[portal.front.index()];
        let gone = leaf_zone[portal.back.index()];
        if keep != gone {
            for zone in leaf_zone.iter_mut().filter(|z| **z == gone) {
                *zone = keep;
            }
        }
    }
    fold_zones(&leaf_zone)
}

fn zone_of(model: &Model, leaf: Option<LeafIndex>) -> u8 {
    leaf.and_then(|l| model.leaves.get(l.index())).map_or(0, |l| l.zone)
}

/// Gives every node polygon the zones on either side of it. A polygon spanning more
/// than one pair of zones is cut so each piece has one pair; the node keeps the first
/// piece and the rest join its coplanar chain.
fn propagate_zones(
    model: &mut Model,
    ctx: &mut BuildContext,
    primary_of: &[Option<NodeIndex>],
) -> BspResult<usize> {
    let mut split_nodes = 0;
    for index in 0..primary_of.len() {
        let node = NodeIndex::from_index(index);
        let (Some(primary), Some(poly)) = (primary_of[index], model.node_polygon(node)) else {
            continue;
        };
        let n = model.node(node)?.clone();
        let flipped = n.plane.normal.dot(model.node(primary)?.plane.normal) < 0.0;

        let mut pieces = Vec::new();
        for (front, back, piece) in leaf_pairs(model, ctx, primary, poly)? {
            let (front, back) = (zone_of(model, front), zone_of(model, back));
            let zone = if flipped { [front, back] } else { [back, front] };
            pieces.push((zone, piece));
        }
        let Some((first_zone, _)) = pieces.first() else {
            ctx.geometry_error("Node polygon vanished while assigning zones");
            continue;
        };
        let first_zone = *first_zone;
        if pieces.iter().all(|(zone, _)| *zone == first_zone) {
            model.node_mut(node)?.zone = first_zone;
            continue;
        }

        // The node is not emptied: it keeps the first piece and the rest join its coplanar chain.
        let mut pieces = pieces.into_iter();
        let Some((zone, piece)) = pieces.next() else {
            continue;
        };
        if piece.vertices.len() > MAX_NODE_VERTICES {
            ctx.geometry_error("Zone fragment too large to replace its node");
            model.node_mut(node)?.zone = zone;
            continue;
        }
        let mut points: Vec<PointIndex> = Vec::with_capacity(piece.vertices.len());
        for vertex in piece.vertices.iter() {
            let point = model.add_point(vertex, false);
            if points.last() != Some(&point) && points.first() != Some(&point) {
                points.push(point);
            }
        }
        if points.len() < 3 {
            ctx.geometry_error("Zone fragment collapsed");
            model.node_mut(node)?.zone = zone;
            continue;
        }
        let vert_pool = VertIndex::from_index(model.verts.len());
        model
            .verts
            .extend(points.iter().map(|&point| Vert { point, side: None }));
        let replaced = model.node_mut(node)?;
        replaced.vert_pool = vert_pool;
        replaced.num_vertices = points.len() as u8;
        replaced.zone = zone;
        split_nodes += 1;

        for (zone, mut piece) in pieces {
            piece.link = Some(LinkIndex::from_index(n.surface.index()));
            let added = add_node(model, ctx, Some(primary), NodePlace::Plane, n.flags, &piece)?;
            model.node_mut(added)?.zone = zone;
        }
    }
    Ok(split_nodes)
}

/// Derives leaves, portals and zones for the tree and stores the zone layout on the
/// nodes, leaves and zone table of `model`.
pub fn compute_visibility(model: &mut Model, ctx: &mut BuildContext) -> BspResult<VisibilityReport> {
    let errors_before = ctx.errors;
    model.leaves.clear();
    model.zones.clear();
    model.portal_nodes.clear();
    for node in model.nodes.iter_mut() {
        node.leaf = [None, None];
        node.zone = [0, 0];
    }
    let Some(root) = model.root() else {
        model.zones.push(Zone {
            connectivity: 1,
            visibility: 1,
        });
        return Ok(VisibilityReport::default());
    };

    let mut primary_of = vec![None; model.nodes.len()];
    let outside = model.root_outside;
    assign_leaves(model, ctx, &mut primary_of, root, outside, 0)?;

    let mut portals = Vec::new();
    find_portals(model, ctx, root, &mut Vec::new(), &mut portals, 0)?;
    let authored = block_author_portals(model, ctx, &primary_of, &mut portals)?;
    debug!(
        "{} leaves, {} portals, {} author portals",
        model.leaves.len(),
        portals.len(),
        authored
    );

    let (leaf_zones, num_zones) = form_zones(model.leaves.len(), &portals);
    for (leaf, zone) in model.leaves.iter_mut().zip(leaf_zones) {
        leaf.zone = zone;
    }
    model.zones = vec![Zone::default(); num_zones + 1];
    for index in 0..model.nodes.len() {
        let leaf = model.nodes[index].leaf;
        model.nodes[index].zone = [zone_of(model, leaf[0]), zone_of(model, leaf[1])];
    }

    let split_nodes = propagate_zones(model, ctx, &primary_of)?;

    for (z, zone) in model.zones.iter_mut().enumerate() {
        zone.connectivity = 1u64 << z;
    }
    for index in 0..model.nodes.len() {
        let n = &model.nodes[index];
        if n.num_vertices == 0 || !model.surface(n.surface)?.flags.contains(PolyFlags::PORTAL) {
            continue;
        }
        let [back, front] = n.zone;
        model.portal_nodes.push(NodeIndex::from_index(index));
        let (back, front) = (back as usize, front as usize);
        if back < model.zones.len() && front < model.zones.len() {
            model.zones[back].connectivity |= 1u64 << front;
            model.zones[front].connectivity |= 1u64 << back;
        }
    }
    for zone in model.zones.iter_mut() {
        zone.visibility = zone.connectivity;
    }
    for leaf in 0..model.leaves.len() {
        let zone = model.leaves[leaf].zone as usize;
        model.leaves[leaf].visible_zones = model.zones.get(zone).map_or(0, |z| z.connectivity);
    }
    build_zone_masks(model, ctx, root, 0)?;

    let report = VisibilityReport {
        leaves: model.leaves.len(),
        portals,
        zones: num_zones,
        split_nodes,
        errors: ctx.errors - errors_before,
    };
    info!(
        "Visibility: {} leaves, {} portals ({} blocked), {} zones",
        report.leaves,
        report.portals.len(),
        report.blocked_portals(),
        report.zones
    );
    Ok(report)
}
