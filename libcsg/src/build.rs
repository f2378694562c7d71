use bsp::model::*;
use bsp::poly::{LinkIndex, PolyFlags, Polygon, SplitResult};
use bsp::types::*;
use cgmath::InnerSpace;
use log::info;

use crate::bounds::build_bounds;
use crate::config::{BuildMode, BuildParams};
use crate::context::{BuildContext, NullProgress, ProgressEventListener};
use crate::refresh::refresh;
use crate::splitter::find_best_split;

#[derive(Debug, Clone, Default)]
pub struct BuildReport {
    pub errors: u32,
    pub nodes: usize,
    pub surfaces: usize,
    pub depth_limit_hits: u32,
}

/// Inserts `poly` as a node under `parent` and returns the new node.
///
/// A polygon whose link is missing or equal to the surface count opens a new surface;
/// any other link must name an existing surface. Polygons with more vertices than a
/// node can hold are split in two, the second half hanging off the first as a coplanar.
pub fn add_node(
    model: &mut Model,
    ctx: &mut BuildContext,
    parent: Option<NodeIndex>,
    place: NodePlace,
    node_flags: NodeFlags,
    poly: &Polygon,
) -> BspResult<NodeIndex> {
    if poly.vertices.len() > MAX_NODE_VERTICES {
        let mut first = poly.clone();
        first.vertices.truncate(MAX_NODE_VERTICES);
        let mut second = poly.clone();
        second.vertices.drain(1..MAX_NODE_VERTICES - 1);

        let node = add_node(model, ctx, parent, place, node_flags, &first)?;
        second.link = Some(LinkIndex::from_index(model.node(node)?.surface.index()));
        add_node(model, ctx, Some(node), NodePlace::Plane, node_flags, &second)?;
        return Ok(node);
    }
    if poly.vertices.is_empty() {
        return Err(BspError::from("Cannot add a polygon without vertices"));
    }

    // Coplanars always go to the end of the chain.
    let mut parent = parent;
    if place == NodePlace::Plane {
        let mut last = parent.ok_or_else(|| BspError::from("Coplanar node without a parent"))?;
        while let Some(next) = model.node(last)?.coplanar {
            last = next;
        }
        parent = Some(last);
    }

    let surface = match poly.link {
        Some(link) if link.index() < model.surfaces.len() => SurfaceIndex::from_index(link.index()),
        Some(link) if link.index() > model.surfaces.len() => {
            return Err(BspError::from(format!(
                "Polygon links to missing surface {}",
                link
            )));
        }
        _ => add_surface(model, poly),
    };

    let plane = PlaneF::from_point_normal(&poly.vertices[0], &poly.normal);
    let surface_flags = model.surface(surface)?.flags;
    let mut flags = node_flags;
    if surface_flags.contains(PolyFlags::NOT_SOLID) {
        flags |= NodeFlags::NOT_CSG;
    }
    if surface_flags.intersects(PolyFlags::INVISIBLE | PolyFlags::PORTAL) {
        flags |= NodeFlags::NOT_VIS_BLOCKING;
    }

    let (zone, leaf) = match (place, parent) {
        (NodePlace::Root, _) | (_, None) => ([0u8, 0u8], [None, None]),
        (NodePlace::Front, Some(p)) | (NodePlace::Back, Some(p)) => {
            let side = (place == NodePlace::Front) as usize;
            let parent_node = model.node(p)?;
            (
                [parent_node.zone[side]; 2],
                [parent_node.leaf[side]; 2],
            )
        }
        (NodePlace::Plane, Some(p)) => {
            let parent_node = model.node(p)?;
            let flipped = (plane.normal.dot(parent_node.plane.normal) < 0.0) as usize;
            (
                [parent_node.zone[flipped], parent_node.zone[1 - flipped]],
                [parent_node.leaf[flipped], parent_node.leaf[1 - flipped]],
            )
        }
    };

    // Deduplicate the ring against the point table.
    let mut points: Vec<PointIndex> = Vec::with_capacity(poly.vertices.len());
    for vertex in poly.vertices.iter() {
        let point = model.add_point(vertex, false);
        if points.last() != Some(&point) {
            points.push(point);
        }
    }
    while points.len() > 1 && points.first() == points.last() {
        points.pop();
    }
    if points.len() < 3 {
        ctx.geometry_error("Infinitesimal polygon collapsed while adding a node");
        points.clear();
    }

    let index = NodeIndex::from_index(model.nodes.len());
    match (place, parent) {
        (NodePlace::Root, _) | (_, None) => {
            if !model.nodes.is_empty() {
                return Err(BspError::from("Root node added to a non-empty tree"));
            }
        }
        (NodePlace::Front, Some(p)) => model.node_mut(p)?.front = Some(index),
        (NodePlace::Back, Some(p)) => model.node_mut(p)?.back = Some(index),
        (NodePlace::Plane, Some(p)) => model.node_mut(p)?.coplanar = Some(index),
    }

    let vert_pool = VertIndex::from_index(model.verts.len());
    model
        .verts
        .extend(points.iter().map(|&point| Vert { point, side: None }));

    model.nodes.push(Node {
        plane,
        zone_mask: 0,
        flags,
        vert_pool,
        surface,
        back: None,
        front: None,
        coplanar: None,
        collision_bound: None,
        render_bound: None,
        zone,
        num_vertices: points.len() as u8,
        leaf,
    });

    Ok(index)
}

fn add_surface(model: &mut Model, poly: &Polygon) -> SurfaceIndex {
    let base = model.add_point(&poly.base, true);
    let normal = model.add_vector(&poly.normal, true);
    let texture_u = model.add_vector(&poly.texture_u, false);
    let texture_v = model.add_vector(&poly.texture_v, false);
    let index = SurfaceIndex::from_index(model.surfaces.len());
    model.surfaces.push(Surface {
        plane: PlaneF::from_point_normal(&poly.vertices[0], &poly.normal),
        base,
        normal,
        texture_u,
        texture_v,
        flags: poly.flags - PolyFlags::NO_ADD_TO_BSP,
        material: poly.material,
        brush_poly: poly.brush_poly,
    });
    index
}

/// Drops polygons that cannot become nodes, counting each one as a geometry error.
pub(crate) fn discard_degenerate(ctx: &mut BuildContext, pool: &mut Vec<Polygon>) {
    pool.retain(|poly| {
        let keep = !poly.is_degenerate();
        if !keep {
            ctx.geometry_error("Discarded a degenerate polygon");
        }
        keep
    });
}

/// Recursively partitions `pool` under `parent`.
pub(crate) fn split_poly_list(
    model: &mut Model,
    ctx: &mut BuildContext,
    parent: Option<NodeIndex>,
    place: NodePlace,
    mut pool: Vec<Polygon>,
    params: &BuildParams,
    depth: u32,
) -> BspResult<()> {
    if !ctx.can_descend(depth, "Partitioning") {
        return Ok(());
    }
    discard_degenerate(ctx, &mut pool);
    let Some(best) = find_best_split(&pool, params.optimization, params.balance, params.portal_bias)
    else {
        return Ok(());
    };

    let relink = params.mode == BuildMode::Relink;
    let mut splitter = pool.remove(best);
    if relink {
        splitter.link = Some(LinkIndex::from_index(model.surfaces.len()));
    }
    let node = add_node(model, ctx, parent, place, NodeFlags::empty(), &splitter)?;

    let mut front = Vec::new();
    let mut back = Vec::new();
    for mut poly in pool.into_iter() {
        match poly.split_with_plane(&splitter.vertices[0], &splitter.normal, false) {
            SplitResult::Coplanar => {
                if relink {
                    poly.link = Some(LinkIndex::from_index(model.surfaces.len() - 1));
                }
                add_node(model, ctx, Some(node), NodePlace::Plane, NodeFlags::empty(), &poly)?;
            }
            SplitResult::Front => front.push(poly),
            SplitResult::Back => back.push(poly),
            SplitResult::Split {
                front: front_half,
                back: back_half,
            } => {
                for (mut half, list) in [(front_half, &mut front), (back_half, &mut back)] {
                    if half.vertices.len() >= VERTEX_THRESHOLD {
                        list.push(half.split_in_half());
                    }
                    list.push(half);
                }
            }
        }
    }

    if !front.is_empty() {
        split_poly_list(model, ctx, Some(node), NodePlace::Front, front, params, depth + 1)?;
    }
    if !back.is_empty() {
        split_poly_list(model, ctx, Some(node), NodePlace::Back, back, params, depth + 1)?;
    }
    Ok(())
}

/// Builds the tree from the staging polygons.
pub fn build(model: &mut Model, ctx: &mut BuildContext, params: &BuildParams) -> BspResult<BuildReport> {
    build_with_progress(model, ctx, params, &mut NullProgress)
}

pub fn build_with_progress(
    model: &mut Model,
    ctx: &mut BuildContext,
    params: &BuildParams,
    progress: &mut dyn ProgressEventListener,
) -> BspResult<BuildReport> {
    let params = params.validated()?;
    let errors_before = ctx.errors;
    let hits_before = ctx.depth_limit_hits;

    progress.progress(0, 3, "Partitioning".to_owned(), "".to_owned());
    match params.mode {
        BuildMode::Relink => model.empty_model(EmptyFlags::SURFACE_INFO),
        BuildMode::Preserve => {
            // Only surface data survives; refresh drops what the old tree alone used.
            for node in model.nodes.iter_mut() {
                node.num_vertices = 0;
            }
            refresh(model, false)?;
            model.empty_model(EmptyFlags::empty());
        }
    }

    if !model.polys.is_empty() {
        let pool = model.polys.clone();
        split_poly_list(model, ctx, None, NodePlace::Root, pool, &params, 0)?;
    }

    progress.progress(1, 3, "Compacting".to_owned(), "".to_owned());
    refresh(model, false)?;
    progress.progress(2, 3, "Building bounds".to_owned(), "".to_owned());
    build_bounds(model, ctx)?;
    progress.progress(3, 3, "Partitioning".to_owned(), "Partitioned".to_owned());

    let report = BuildReport {
        errors: ctx.errors - errors_before,
        nodes: model.nodes.len(),
        surfaces: model.surfaces.len(),
        depth_limit_hits: ctx.depth_limit_hits - hits_before,
    };
    info!(
        "Built BSP from {} polygons: {} nodes, {} surfaces, {} errors",
        model.polys.len(),
        report.nodes,
        report.surfaces,
        report.errors
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brush::box_faces;
    use cgmath::vec3;

    fn unit_box() -> Vec<Polygon> {
        box_faces(&BoxF {
            min: vec3(-0.5, -0.5, -0.5),
            max: vec3(0.5, 0.5, 0.5),
        })
    }

    #[test]
    fn box_builds_a_chain() {
        let mut model = Model::from_polys(unit_box(), true);
        let mut ctx = BuildContext::new();
        let report = build(&mut model, &mut ctx, &BuildParams::brush()).unwrap();
        assert_eq!(report.errors, 0);
        assert_eq!(report.nodes, 6);
        assert_eq!(report.surfaces, 6);
        assert_eq!(model.points.len(), 8);
        assert!(!model.point_outside(&vec3(0.0, 0.0, 0.0)));
        assert!(model.point_outside(&vec3(0.0, 0.0, 0.75)));
        assert!(model.point_outside(&vec3(-2.0, 0.3, 0.0)));
    }

    #[test]
    fn oversized_polygon_is_split_across_coplanars() {
        let ring: Vec<_> = (0..20)
            .map(|i| {
                let a = i as Real * std::f64::consts::PI * 2.0 / 20.0;
                vec3(a.cos() * 4.0, a.sin() * 4.0, 0.0)
            })
            .collect();
        let poly = Polygon::from_vertices(ring);
        let mut model = Model::default();
        let mut ctx = BuildContext::new();
        let root = add_node(&mut model, &mut ctx, None, NodePlace::Root, NodeFlags::empty(), &poly).unwrap();
        let root_node = model.node(root).unwrap();
        assert_eq!(root_node.num_vertices as usize, MAX_NODE_VERTICES);
        let second = root_node.coplanar.unwrap();
        assert_eq!(model.node(second).unwrap().num_vertices, 6);
        assert_eq!(model.node(second).unwrap().surface, root_node.surface);
        assert_eq!(model.surfaces.len(), 1);
    }

    #[test]
    fn degenerate_polygon_counts_an_error() {
        let mut poly = Polygon::from_vertices(vec![
            vec3(0.0, 0.0, 0.0),
            vec3(1.0, 0.0, 0.0),
            vec3(0.0, 1.0, 0.0),
        ]);
        poly.vertices = vec![vec3(0.0, 0.0, 0.0), vec3(0.005, 0.0, 0.0), vec3(0.0, 0.005, 0.0)];
        let mut model = Model::default();
        let mut ctx = BuildContext::new();
        let node = add_node(&mut model, &mut ctx, None, NodePlace::Root, NodeFlags::empty(), &poly).unwrap();
        assert_eq!(model.node(node).unwrap().num_vertices, 0);
        assert_eq!(ctx.errors, 1);
    }

    #[test]
    fn degenerate_staging_polygons_are_discarded() {
        let collapsed = Polygon::from_vertices(vec![vec3(0.0, 0.0, 0.0), vec3(1.0, 0.0, 0.0), vec3(1.0, 0.0, 0.0)]);
        let line = Polygon::from_vertices(vec![vec3(0.0, 0.0, 0.0), vec3(0.1, 0.0, 0.0), vec3(0.2, 0.0, 0.0)]);
        let mut polys = vec![collapsed, line];
        polys.extend(unit_box());
        let mut model = Model::from_polys(polys, true);
        let mut ctx = BuildContext::new();
        let report = build(&mut model, &mut ctx, &BuildParams::default()).unwrap();
        assert_eq!(report.errors, 2);
        assert_eq!(report.nodes, 6);
        assert!(!model.point_outside(&vec3(0.0, 0.0, 0.0)));
        assert!(model.point_outside(&vec3(3.0, 0.0, 0.0)));
        assert!(model.point_outside(&vec3(0.0, -2.0, 0.0)));
    }

    #[test]
    fn large_split_fragments_are_halved() {
        let wall = Polygon::from_vertices(vec![
            vec3(0.0, -2.0, -1.0),
            vec3(0.0, 2.0, -1.0),
            vec3(0.0, 2.0, 1.0),
            vec3(0.0, -2.0, 1.0),
        ]);
        // No vertex lies on the wall, so each half gets 15 ring vertices plus two cuts.
        let disc = Polygon::from_vertices(
            (0..30)
                .map(|i| {
                    let a = (i as Real + 0.25) * std::f64::consts::PI * 2.0 / 30.0;
                    vec3(a.cos(), a.sin(), 0.0)
                })
                .collect(),
        );
        let mut model = Model::from_polys(vec![wall, disc], true);
        let mut ctx = BuildContext::new();
        let report = build(&mut model, &mut ctx, &BuildParams::default()).unwrap();
        assert_eq!(report.errors, 0);

        let disc_nodes: Vec<&Node> = model
            .nodes
            .iter()
            .filter(|n| n.plane.normal.z.abs() > 0.9)
            .collect();
        assert_eq!(disc_nodes.len(), 4);
        assert!(disc_nodes
            .iter()
            .all(|n| (n.num_vertices as usize) < VERTEX_THRESHOLD));
    }

    #[test]
    fn node_flags_follow_the_reused_surface() {
        let mut portal = unit_box().remove(0);
        portal.flags = PolyFlags::NOT_SOLID | PolyFlags::PORTAL;
        let mut model = Model::default();
        let mut ctx = BuildContext::new();
        let root = add_node(&mut model, &mut ctx, None, NodePlace::Root, NodeFlags::empty(), &portal).unwrap();

        let mut plain = portal.clone();
        plain.flags = PolyFlags::empty();
        plain.link = Some(LinkIndex::new(0));
        let second = add_node(&mut model, &mut ctx, Some(root), NodePlace::Plane, NodeFlags::empty(), &plain).unwrap();
        let flags = model.node(second).unwrap().flags;
        assert!(flags.contains(NodeFlags::NOT_CSG));
        assert!(flags.contains(NodeFlags::NOT_VIS_BLOCKING));
    }

    #[test]
    fn dangling_link_is_fatal() {
        let mut poly = unit_box().remove(0);
        poly.link = Some(LinkIndex::new(5));
        let mut model = Model::default();
        let mut ctx = BuildContext::new();
        assert!(add_node(&mut model, &mut ctx, None, NodePlace::Root, NodeFlags::empty(), &poly).is_err());
    }

    #[test]
    fn depth_guard_drops_deep_pools() {
        // Parallel slabs force one level per polygon.
        let polys: Vec<Polygon> = (0..8)
            .map(|i| {
                let z = i as Real;
                Polygon::from_vertices(vec![
                    vec3(0.0, 0.0, z),
                    vec3(1.0, 0.0, z),
                    vec3(1.0, 1.0, z),
                    vec3(0.0, 1.0, z),
                ])
            })
            .collect();
        let mut model = Model::from_polys(polys, true);
        let mut ctx = BuildContext::with_max_depth(3);
        let report = build(&mut model, &mut ctx, &BuildParams::brush()).unwrap();
        assert_eq!(report.depth_limit_hits, 1);
        assert!(report.errors >= 1);
        assert_eq!(report.nodes, 4);
    }
}
