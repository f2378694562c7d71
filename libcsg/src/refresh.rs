use bsp::model::*;
use bsp::types::*;
use log::debug;

/// Entries dropped from each table by one compaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub nodes: usize,
    pub surfaces: usize,
    pub points: usize,
    pub vectors: usize,
    pub verts: usize,
}

impl RefreshReport {
    pub fn is_empty(&self) -> bool {
        *self == RefreshReport::default()
    }
}

/// Old-to-new index map over a table where `live[i]` marks the entries kept.
fn build_remap(live: &[bool]) -> Vec<Option<usize>> {
    let mut next = 0;
    live.iter()
        .map(|&keep| {
            if keep {
                next += 1;
                Some(next - 1)
            } else {
                None
            }
        })
        .collect()
}

fn compact<T>(table: &mut Vec<T>, live: &[bool]) -> usize {
    let before = table.len();
    let mut index = 0;
    table.retain(|_| {
        let keep = live[index];
        index += 1;
        keep
    });
    before - table.len()
}

fn tag(live: &mut [bool], index: usize, what: &str) -> BspResult<()> {
    match live.get_mut(index) {
        Some(flag) => {
            *flag = true;
            Ok(())
        }
        None => Err(BspError::from(format!("Dangling {} reference {}", what, index))),
    }
}

fn remapped(map: &[Option<usize>], index: usize, what: &str) -> BspResult<usize> {
    map.get(index)
        .copied()
        .flatten()
        .ok_or_else(|| BspError::from(format!("Dangling {} reference {}", what, index)))
}

/// Mark-sweep compaction of nodes, surfaces, the vertex pool, points and vectors.
///
/// Nodes are live when reachable from the root or from the portal node list. With
/// `remap_surfaces` false every surface is kept, otherwise only those of live nodes.
pub fn refresh(model: &mut Model, remap_surfaces: bool) -> BspResult<RefreshReport> {
    let mut report = RefreshReport::default();

    // Tag nodes and surfaces.
    let mut node_live = vec![false; model.nodes.len()];
    let mut surface_live = vec![!remap_surfaces; model.surfaces.len()];
    let mut pending: Vec<NodeIndex> = model.root().into_iter().collect();
    pending.extend(model.portal_nodes.iter().copied());
    while let Some(index) = pending.pop() {
        let node = model.node(index)?;
        if node_live[index.index()] {
            continue;
        }
        node_live[index.index()] = true;
        match surface_live.get_mut(node.surface.index()) {
            Some(live) => *live = true,
            None => {
                return Err(BspError::from(format!(
                    "Node {} references missing surface {}",
                    index, node.surface
                )))
            }
        }
        pending.extend(node.front);
        pending.extend(node.back);
        pending.extend(node.coplanar);
    }

    // Sweep nodes and surfaces.
    let node_map = build_remap(&node_live);
    let surface_map = build_remap(&surface_live);
    report.nodes = compact(&mut model.nodes, &node_live);
    report.surfaces = compact(&mut model.surfaces, &surface_live);

    let remap_node = |index: Option<NodeIndex>| -> BspResult<Option<NodeIndex>> {
        match index {
            Some(i) => Ok(Some(NodeIndex::from_index(remapped(&node_map, i.index(), "node")?))),
            None => Ok(None),
        }
    };

    // Copy each node's vertex span into a fresh, gapless pool.
    let mut verts = Vec::with_capacity(model.verts.len());
    for node in model.nodes.iter_mut() {
        node.surface = SurfaceIndex::from_index(remapped(&surface_map, node.surface.index(), "surface")?);
        node.front = remap_node(node.front)?;
        node.back = remap_node(node.back)?;
        node.coplanar = remap_node(node.coplanar)?;

        let start = node.vert_pool.index();
        let span = model
            .verts
            .get(start..start + node.num_vertices as usize)
            .ok_or_else(|| BspError::from("Node vertex span out of range"))?;
        node.vert_pool = VertIndex::from_index(verts.len());
        verts.extend_from_slice(span);
    }
    report.verts = model.verts.len() - verts.len();
    model.verts = verts;

    model.portal_nodes = model
        .portal_nodes
        .iter()
        .filter_map(|n| node_map.get(n.index()).copied().flatten())
        .map(NodeIndex::from_index)
        .collect();
    for hull in model.leaf_hulls.iter_mut() {
        hull.faces.retain(|face| node_map.get(face.node.index()).copied().flatten().is_some());
        for face in hull.faces.iter_mut() {
            face.node = NodeIndex::from_index(remapped(&node_map, face.node.index(), "node")?);
        }
    }
    model.lightmaps.retain(|lm| surface_live.get(lm.surface.index()).copied().unwrap_or(false));
    for lightmap in model.lightmaps.iter_mut() {
        lightmap.surface = SurfaceIndex::from_index(remapped(&surface_map, lightmap.surface.index(), "surface")?);
    }

    // Tag points and vectors.
    let mut point_live = vec![false; model.points.len()];
    let mut vector_live = vec![false; model.vectors.len()];
    for surface in model.surfaces.iter() {
        tag(&mut point_live, surface.base.index(), "point")?;
        tag(&mut vector_live, surface.normal.index(), "vector")?;
        tag(&mut vector_live, surface.texture_u.index(), "vector")?;
        tag(&mut vector_live, surface.texture_v.index(), "vector")?;
    }
    for vert in model.verts.iter() {
        tag(&mut point_live, vert.point.index(), "point")?;
    }

    // Sweep them.
    let point_map = build_remap(&point_live);
    let vector_map = build_remap(&vector_live);
    report.points = compact(&mut model.points, &point_live);
    report.vectors = compact(&mut model.vectors, &vector_live);
    for surface in model.surfaces.iter_mut() {
        surface.base = PointIndex::from_index(remapped(&point_map, surface.base.index(), "point")?);
        surface.normal = VectorIndex::from_index(remapped(&vector_map, surface.normal.index(), "vector")?);
        surface.texture_u = VectorIndex::from_index(remapped(&vector_map, surface.texture_u.index(), "vector")?);
        surface.texture_v = VectorIndex::from_index(remapped(&vector_map, surface.texture_v.index(), "vector")?);
    }
    for vert in model.verts.iter_mut() {
        vert.point = PointIndex::from_index(remapped(&point_map, vert.point.index(), "point")?);
    }
    model.invalidate_lookups();

    debug!(
        "Refresh removed {} nodes, {} surfaces, {} points, {} vectors, {} pool entries",
        report.nodes, report.surfaces, report.points, report.vectors, report.verts
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brush::box_faces;
    use crate::build::build;
    use crate::config::BuildParams;
    use crate::context::BuildContext;
    use cgmath::vec3;

    fn built_box() -> Model {
        let polys = box_faces(&BoxF {
            min: vec3(-0.5, -0.5, -0.5),
            max: vec3(0.5, 0.5, 0.5),
        });
        let mut model = Model::from_polys(polys, true);
        build(&mut model, &mut BuildContext::new(), &BuildParams::brush()).unwrap();
        model
    }

    #[test]
    fn unreachable_entries_are_dropped() {
        let mut model = built_box();
        // Orphan a node by cutting the link to the last back child.
        let last = model.nodes.len() - 1;
        for node in model.nodes.iter_mut() {
            if node.back.map(|b| b.index()) == Some(last) {
                node.back = None;
            }
        }
        model.points.push(vec3(9.0, 9.0, 9.0));

        let report = refresh(&mut model, true).unwrap();
        assert_eq!(report.nodes, 1);
        assert_eq!(report.surfaces, 1);
        assert!(report.points >= 1);
        assert_eq!(model.nodes.len(), 5);
        assert_eq!(model.surfaces.len(), 5);
        assert!(refresh(&mut model, true).unwrap().is_empty());
    }

    #[test]
    fn dangling_surface_is_fatal() {
        let mut model = built_box();
        model.nodes[0].surface = SurfaceIndex::new(99);
        assert!(refresh(&mut model, false).is_err());
    }
}
