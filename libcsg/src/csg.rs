use bsp::model::*;
use bsp::poly::{BrushPolyIndex, LinkIndex, PolyFlags, Polygon};
use bsp::types::*;
use cgmath::InnerSpace;
use log::{debug, info};

use crate::bounds::build_bounds;
use crate::brush::{Brush, CsgOper};
use crate::build::{add_node, build};
use crate::config::BuildParams;
use crate::context::BuildContext;
use crate::filter::{filter_poly, FilterHandler, PolyFilter};
use crate::merge::merge_coplanars;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CsgOptions {
    /// Flags added to every brush polygon.
    pub poly_flags: PolyFlags,
    /// Rebuild bounds after an add or subtract.
    pub build_bounds: bool,
    /// Merge the coplanar pieces of an intersect or deintersect result.
    pub merge_polys: bool,
}

impl Default for CsgOptions {
    fn default() -> Self {
        CsgOptions {
            poly_flags: PolyFlags::empty(),
            build_bounds: true,
            merge_polys: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CsgReport {
    /// Non-fatal geometry errors hit during the operation.
    pub errors: u32,
    pub nodes: usize,
    /// Polygons left in the brush after an intersect or deintersect.
    pub brush_polys: usize,
}

struct AddBrushToWorld;

impl FilterHandler for AddBrushToWorld {
    fn filtered(
        &mut self,
        tree: &mut Model,
        ctx: &mut BuildContext,
        node: Option<NodeIndex>,
        place: NodePlace,
        poly: Polygon,
        filter: PolyFilter,
    ) -> BspResult<()> {
        let keep = match filter {
            PolyFilter::Outside | PolyFilter::CoplanarOutside => true,
            PolyFilter::CospatialFacingOut => !poly.flags.contains(PolyFlags::SEMISOLID),
            _ => false,
        };
        if keep {
            add_node(tree, ctx, node, place, NodeFlags::IS_NEW, &poly)?;
        }
        Ok(())
    }
}

struct SubtractBrushFromWorld;

impl FilterHandler for SubtractBrushFromWorld {
    fn filtered(
        &mut self,
        tree: &mut Model,
        ctx: &mut BuildContext,
        node: Option<NodeIndex>,
        place: NodePlace,
        poly: Polygon,
        filter: PolyFilter,
    ) -> BspResult<()> {
        if matches!(filter, PolyFilter::Inside | PolyFilter::CoplanarInside) {
            add_node(tree, ctx, node, place, NodeFlags::IS_NEW, &poly.reversed())?;
        }
        Ok(())
    }
}

/// Cuts one world polygon by the brush tree. Surviving pieces of a cut polygon are
/// hung at the end of its coplanar chain; any discarded piece retires the original.
struct WorldToBrush<'a> {
    world: &'a mut Model,
    node: NodeIndex,
    last_coplanar: NodeIndex,
    discarded: usize,
    subtract: bool,
}

impl FilterHandler for WorldToBrush<'_> {
    fn filtered(
        &mut self,
        _tree: &mut Model,
        ctx: &mut BuildContext,
        _node: Option<NodeIndex>,
        _place: NodePlace,
        poly: Polygon,
        filter: PolyFilter,
    ) -> BspResult<()> {
        let keep = match filter {
            PolyFilter::Outside | PolyFilter::CoplanarOutside => true,
            PolyFilter::CospatialFacingIn => self.subtract,
            _ => false,
        };
        if keep {
            if poly.flags.contains(PolyFlags::ED_CUT) {
                add_node(
                    self.world,
                    ctx,
                    Some(self.last_coplanar),
                    NodePlace::Plane,
                    NodeFlags::IS_NEW,
                    &poly,
                )?;
            }
        } else {
            self.discarded += 1;
            self.world.node_mut(self.node)?.num_vertices = 0;
        }
        Ok(())
    }
}

/// Collects the fragments of one category set into a polygon list.
struct Collect<'a> {
    out: &'a mut Vec<Polygon>,
    keep: fn(PolyFilter) -> bool,
    reverse: bool,
}

impl FilterHandler for Collect<'_> {
    fn filtered(
        &mut self,
        _tree: &mut Model,
        _ctx: &mut BuildContext,
        _node: Option<NodeIndex>,
        _place: NodePlace,
        mut poly: Polygon,
        filter: PolyFilter,
    ) -> BspResult<()> {
        if (self.keep)(filter) && poly.fix() >= 3 {
            if self.reverse {
                poly.reverse();
            }
            self.out.push(poly);
        }
        Ok(())
    }
}

fn intersect_brush_keeps(filter: PolyFilter) -> bool {
    matches!(filter, PolyFilter::Inside | PolyFilter::CoplanarInside)
}

fn intersect_world_keeps(filter: PolyFilter) -> bool {
    matches!(
        filter,
        PolyFilter::Inside | PolyFilter::CoplanarInside | PolyFilter::CospatialFacingOut
    )
}

fn deintersect_brush_keeps(filter: PolyFilter) -> bool {
    matches!(filter, PolyFilter::Outside | PolyFilter::CoplanarOutside)
}

fn deintersect_world_keeps(filter: PolyFilter) -> bool {
    matches!(
        filter,
        PolyFilter::Inside | PolyFilter::CoplanarInside | PolyFilter::CospatialFacingIn
    )
}

/// Filters the world polygons near the brush through the brush tree `temp`.
fn filter_world_through_brush(
    world: &mut Model,
    temp: &mut Model,
    ctx: &mut BuildContext,
    oper: CsgOper,
    out: &mut Vec<Polygon>,
    node: NodeIndex,
    sphere: &SphereF,
    depth: u32,
) -> BspResult<()> {
    if !ctx.can_descend(depth, "World filtering") {
        return Ok(());
    }
    let mut current = Some(node);
    while let Some(index) = current {
        let n = world.node(index)?;
        // New nodes and everything under them came from the brush.
        if n.flags.contains(NodeFlags::IS_NEW) {
            return Ok(());
        }
        let dist = n.plane.distance_to(&sphere.origin);
        let do_front = dist >= -sphere.radius;
        let do_back = dist <= sphere.radius;

        if do_front && do_back {
            if let Some(poly) = world.node_polygon(index) {
                match oper {
                    CsgOper::Add | CsgOper::Subtract => {
                        let num_nodes = world.nodes.len();
                        let mut last = index;
                        while let Some(next) = world.node(last)?.coplanar {
                            last = next;
                        }
                        let mut cutter = WorldToBrush {
                            world: &mut *world,
                            node: index,
                            last_coplanar: last,
                            discarded: 0,
                            subtract: oper == CsgOper::Subtract,
                        };
                        filter_poly(temp, ctx, &mut cutter, poly)?;
                        if cutter.discarded == 0 {
                            // Untouched; drop the fragments.
                            world.node_mut(last)?.coplanar = None;
                            world.nodes.truncate(num_nodes);
                        } else {
                            world.node_mut(index)?.num_vertices = 0;
                        }
                    }
                    CsgOper::Intersect | CsgOper::Deintersect => {
                        let mut collect = Collect {
                            out: &mut *out,
                            keep: if oper == CsgOper::Intersect {
                                intersect_world_keeps
                            } else {
                                deintersect_world_keeps
                            },
                            reverse: oper == CsgOper::Deintersect,
                        };
                        filter_poly(temp, ctx, &mut collect, poly)?;
                    }
                }
            }
        }

        let n = world.node(index)?;
        let (front, back, coplanar) = (n.front, n.back, n.coplanar);
        if let (true, Some(front)) = (do_front, front) {
            filter_world_through_brush(world, temp, ctx, oper, out, front, sphere, depth + 1)?;
        }
        if let (true, Some(back)) = (do_back, back) {
            filter_world_through_brush(world, temp, ctx, oper, out, back, sphere, depth + 1)?;
        }
        current = coplanar;
    }
    Ok(())
}

fn relink_parent(model: &mut Model, parent: NodeIndex, old: NodeIndex, new: Option<NodeIndex>) -> BspResult<()> {
    let p = model.node_mut(parent)?;
    if p.front == Some(old) {
        p.front = new;
    } else if p.back == Some(old) {
        p.back = new;
    } else if p.coplanar == Some(old) {
        p.coplanar = new;
    } else {
        return Err(BspError::from(format!(
            "Node {} is not a child of {}",
            old, parent
        )));
    }
    Ok(())
}

fn cleanup_node(
    model: &mut Model,
    ctx: &mut BuildContext,
    node: NodeIndex,
    parent: Option<NodeIndex>,
    depth: u32,
) -> BspResult<()> {
    if !ctx.can_descend(depth, "Cleanup") {
        return Ok(());
    }
    model.node_mut(node)?.flags -= NodeFlags::IS_NEW;
    if let Some(front) = model.node(node)?.front {
        cleanup_node(model, ctx, front, Some(node), depth + 1)?;
    }
    if let Some(back) = model.node(node)?.back {
        cleanup_node(model, ctx, back, Some(node), depth + 1)?;
    }
    if let Some(coplanar) = model.node(node)?.coplanar {
        cleanup_node(model, ctx, coplanar, Some(node), depth + 1)?;
    }

    let n = model.node(node)?.clone();
    if n.num_vertices > 0 {
        return Ok(());
    }
    if let Some(plane_index) = n.coplanar {
        // Promote the coplanar, handing it our children.
        let plane_node = model.node_mut(plane_index)?;
        if n.plane.normal.dot(plane_node.plane.normal) >= 0.0 {
            plane_node.front = n.front;
            plane_node.back = n.back;
        } else {
            plane_node.front = n.back;
            plane_node.back = n.front;
        }
        match parent {
            None => {
                let promoted = plane_node.clone();
                plane_node.num_vertices = 0;
                *model.node_mut(node)? = promoted;
            }
            Some(parent) => relink_parent(model, parent, node, Some(plane_index))?,
        }
    } else if n.front.is_none() || n.back.is_none() {
        let replacement = n.front.or(n.back);
        match (parent, replacement) {
            (None, None) => model.nodes.clear(),
            (None, Some(replacement)) => {
                let promoted = model.node(replacement)?.clone();
                *model.node_mut(node)? = promoted;
            }
            (Some(parent), replacement) => relink_parent(model, parent, node, replacement)?,
        }
    }
    Ok(())
}

/// Clears the new-node flags and unlinks empty nodes left behind by a CSG operation.
pub fn cleanup_nodes(model: &mut Model, ctx: &mut BuildContext) -> BspResult<()> {
    match model.root() {
        Some(root) => cleanup_node(model, ctx, root, None, 0),
        None => Ok(()),
    }
}

/// Points every polygon at the first earlier polygon of its range sharing its link.
fn relink_range(polys: &mut [Polygon], offset: usize) {
    for i in (0..polys.len()).rev() {
        let first = (0..i).find(|&j| polys[j].link == polys[i].link).unwrap_or(i);
        polys[i].link = Some(LinkIndex::from_index(offset + first));
    }
}

/// Applies `brush` to the world `model`.
///
/// Add and subtract edit the world tree in place. Intersect and deintersect leave the
/// world alone and replace the brush polygons with the result.
pub fn apply_csg(
    model: &mut Model,
    brush: &mut Brush,
    options: &CsgOptions,
    ctx: &mut BuildContext,
) -> BspResult<CsgReport> {
    let oper = brush.oper;
    let errors_before = ctx.errors;
    let poly_flags = options.poly_flags | brush.flags;
    // Non-solid and semi-solid geometry can only be added.
    let not_flags = if oper == CsgOper::Add {
        PolyFlags::empty()
    } else {
        PolyFlags::SEMISOLID | PolyFlags::NOT_SOLID
    };
    if oper == CsgOper::Subtract {
        model.zones.clear();
    }

    let num_brush_polys = brush.polys.len();
    let mut temp_polys = Vec::with_capacity(num_brush_polys);
    for (i, poly) in brush.polys.iter().enumerate() {
        let mut poly = poly.clone();
        let link = poly.link.map_or(i, |l| l.index());
        if link >= num_brush_polys {
            return Err(BspError::from(format!(
                "Brush polygon {} links to missing polygon {}",
                i, link
            )));
        }
        if poly.is_degenerate() {
            ctx.geometry_error("Skipped a degenerate brush polygon");
            continue;
        }
        poly.link = Some(LinkIndex::from_index(link));
        poly.brush_poly = Some(BrushPolyIndex::from_index(i));
        poly.flags = (poly.flags | poly_flags) - not_flags;
        temp_polys.push(poly);
    }

    let mut out = Vec::new();
    match oper {
        CsgOper::Add | CsgOper::Subtract => {
            // Surface of each link group, opened by the first piece that lands in the world.
            let mut group_surface: Vec<Option<usize>> = vec![None; num_brush_polys];
            for temp in temp_polys.iter() {
                let group = temp.link.map_or(0, |l| l.index());
                let surfaces_before = model.surfaces.len();
                let mut poly = temp.clone();
                poly.flags -= PolyFlags::ED_CUT;
                poly.link = Some(LinkIndex::from_index(
                    group_surface[group].unwrap_or(surfaces_before),
                ));
                if oper == CsgOper::Add {
                    filter_poly(model, ctx, &mut AddBrushToWorld, poly)?;
                } else {
                    filter_poly(model, ctx, &mut SubtractBrushFromWorld, poly)?;
                }
                if group_surface[group].is_none() && model.surfaces.len() > surfaces_before {
                    group_surface[group] = Some(surfaces_before);
                }
            }
        }
        CsgOper::Intersect | CsgOper::Deintersect => {
            for temp in temp_polys.iter() {
                let mut collect = Collect {
                    out: &mut out,
                    keep: if oper == CsgOper::Intersect {
                        intersect_brush_keeps
                    } else {
                        deintersect_brush_keeps
                    },
                    reverse: false,
                };
                filter_poly(model, ctx, &mut collect, temp.clone())?;
            }
        }
    }
    let from_brush = out.len();

    if let Some(root) = model.root() {
        if !temp_polys.is_empty() && !poly_flags.intersects(PolyFlags::NOT_SOLID | PolyFlags::SEMISOLID) {
            let mut temp = Model::from_polys(temp_polys, true);
            build(&mut temp, ctx, &BuildParams::brush())?;
            temp.build_bound();
            let sphere = SphereF::from_box(&temp.bound);
            filter_world_through_brush(model, &mut temp, ctx, oper, &mut out, root, &sphere, 0)?;
        }
    }

    match oper {
        CsgOper::Add | CsgOper::Subtract => {
            cleanup_nodes(model, ctx)?;
            if options.build_bounds {
                build_bounds(model, ctx)?;
            }
        }
        CsgOper::Intersect | CsgOper::Deintersect => {
            let (brush_part, world_part) = out.split_at_mut(from_brush);
            relink_range(brush_part, 0);
            relink_range(world_part, from_brush);
            for poly in out.iter_mut() {
                poly.fix();
            }
            if options.merge_polys {
                merge_coplanars(&mut out, true, false);
            }
            for (i, poly) in out.iter_mut().enumerate() {
                poly.brush_poly = Some(BrushPolyIndex::from_index(i));
            }
            brush.polys = out;
            brush.linked = true;
        }
    }

    let report = CsgReport {
        errors: ctx.errors - errors_before,
        nodes: model.nodes.len(),
        brush_polys: brush.polys.len(),
    };
    debug!("{:?} left {} brush polygons", oper, report.brush_polys);
    info!(
        "Applied {:?} brush with {} polygons: {} nodes, {} errors",
        oper, num_brush_polys, report.nodes, report.errors
    );
    Ok(report)
}
