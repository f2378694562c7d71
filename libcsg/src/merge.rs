use bsp::model::*;
use bsp::poly::{LinkIndex, PolyFlags, Polygon};
use bsp::types::*;
use cgmath::InnerSpace;
use itertools::iproduct;
use log::debug;

use crate::brush::Brush;

const MERGE_PLANE_DIST: Real = 0.001;
const MERGE_NORMAL_DOT: Real = 0.9999;

fn wrap(i: isize, n: usize) -> usize {
    i.rem_euclid(n as isize) as usize
}

/// Merges `second` into `first` when they share an edge and the union stays convex.
/// On success `second` is emptied.
pub fn try_to_merge(first: &mut Polygon, second: &mut Polygon) -> bool {
    let (n1, n2) = (first.vertices.len(), second.vertices.len());
    let Some((start1, start2)) = iproduct!(0..n1, 0..n2)
        .find(|&(i, j)| points_are_same(&first.vertices[i], &second.vertices[j]))
    else {
        return false;
    };

    // The shared edge runs one way round the first ring and the other way round the second.
    let next1 = wrap(start1 as isize + 1, n1);
    let prev2 = wrap(start2 as isize - 1, n2);
    let prev1 = wrap(start1 as isize - 1, n1);
    let next2 = wrap(start2 as isize + 1, n2);
    let (end1, end2) = if points_are_same(&first.vertices[next1], &second.vertices[prev2]) {
        (next1, start2)
    } else if points_are_same(&first.vertices[prev1], &second.vertices[next2]) {
        (start1, next2)
    } else {
        return false;
    };

    let mut merged = first.clone();
    merged.vertices = (0..n1)
        .map(|i| first.vertices[(end1 + i) % n1])
        .chain((1..n2 - 1).map(|i| second.vertices[(end2 + i) % n2]))
        .collect();

    if merged.remove_colinears() && merged.vertices.len() <= MAX_NODE_VERTICES {
        *first = merged;
        second.vertices.clear();
        true
    } else {
        false
    }
}

fn can_group(a: &Polygon, b: &Polygon, merge_disparate: bool) -> bool {
    let (Some(va), Some(vb)) = (a.vertices.first(), b.vertices.first()) else {
        return false;
    };
    let dist = (vb - va).dot(a.normal);
    dist.abs() < MERGE_PLANE_DIST
        && b.normal.dot(a.normal) > MERGE_NORMAL_DOT
        && (merge_disparate
            || (points_are_near(&b.texture_u, &a.texture_u, THRESH_VECTORS_ARE_NEAR)
                && points_are_near(&b.texture_v, &a.texture_v, THRESH_VECTORS_ARE_NEAR)))
}

/// Merges coplanar polygons that share a link into convex unions and drops the emptied
/// ones. With `remap_links` the links are renumbered to follow the compaction. Returns
/// how many polygons were removed.
pub fn merge_coplanars(polys: &mut Vec<Polygon>, remap_links: bool, merge_disparate: bool) -> usize {
    for poly in polys.iter_mut() {
        poly.flags -= PolyFlags::ED_PROCESSED;
    }

    let mut groups = 0;
    for i in 0..polys.len() {
        if polys[i].vertices.is_empty() || polys[i].flags.contains(PolyFlags::ED_PROCESSED) {
            continue;
        }
        polys[i].flags |= PolyFlags::ED_PROCESSED;
        let mut group = vec![i];
        for j in i + 1..polys.len() {
            if polys[j].link == polys[i].link
                && !polys[j].vertices.is_empty()
                && can_group(&polys[i], &polys[j], merge_disparate)
            {
                polys[j].flags |= PolyFlags::ED_PROCESSED;
                group.push(j);
            }
        }
        if group.len() > 1 {
            merge_group(polys, &group);
            groups += 1;
        }
    }

    let before = polys.len();
    let mut remap = vec![None; before];
    let mut next = 0;
    for (i, poly) in polys.iter().enumerate() {
        if !poly.vertices.is_empty() {
            remap[i] = Some(next);
            next += 1;
        }
    }
    polys.retain(|p| !p.vertices.is_empty());
    if remap_links {
        for poly in polys.iter_mut() {
            // Links to a merged-away polygon fall back to no link.
            poly.link = poly
                .link
                .and_then(|l| remap.get(l.index()).copied().flatten())
                .map(LinkIndex::from_index);
        }
    }
    debug!("Merged {} coplanar sets, {} -> {} polygons", groups, before, polys.len());
    before - polys.len()
}

fn merge_group(polys: &mut [Polygon], group: &[usize]) {
    let mut merged_any = true;
    while merged_any {
        merged_any = false;
        for (a, &i) in group.iter().enumerate() {
            if polys[i].vertices.is_empty() {
                continue;
            }
            for &j in group[a + 1..].iter() {
                if polys[j].vertices.is_empty() {
                    continue;
                }
                let (head, tail) = polys.split_at_mut(j);
                if try_to_merge(&mut head[i], &mut tail[0]) {
                    merged_any = true;
                }
            }
        }
    }
}

/// Links every brush polygon to the first earlier polygon with the same material,
/// texture basis, flags and plane. Skipped for linked brushes unless `force`.
/// Returns how many polygons were linked to another.
pub fn validate_brush(brush: &mut Brush, force: bool) -> usize {
    if brush.linked && !force {
        return 0;
    }
    brush.linked = true;
    for (i, poly) in brush.polys.iter_mut().enumerate() {
        poly.link = Some(LinkIndex::from_index(i));
    }

    let mut linked = 0;
    for i in 0..brush.polys.len() {
        if brush.polys[i].link.map(|l| l.index()) != Some(i) {
            continue;
        }
        for j in i + 1..brush.polys.len() {
            let (a, b) = (&brush.polys[i], &brush.polys[j]);
            let same_look = b.link.map(|l| l.index()) == Some(j)
                && b.material == a.material
                && b.texture_u == a.texture_u
                && b.texture_v == a.texture_v
                && b.flags == a.flags
                && b.normal.dot(a.normal) > MERGE_NORMAL_DOT;
            let on_plane = match (a.vertices.first(), b.vertices.first()) {
                (Some(va), Some(vb)) => (vb - va).dot(a.normal).abs() < MERGE_PLANE_DIST,
                _ => false,
            };
            if same_look && on_plane {
                brush.polys[j].link = Some(LinkIndex::from_index(i));
                linked += 1;
            }
        }
    }
    debug!("Linked {} of {} brush polygons", linked, brush.polys.len());
    linked
}

/// Replaces the staging polygons with the polygons of the tree, in front, back,
/// coplanar order. With `surf_links` each polygon links to its surface, otherwise
/// to itself.
pub fn build_polys_from_tree(model: &mut Model, surf_links: bool) {
    let mut polys = Vec::new();
    let mut pending: Vec<NodeIndex> = model.root().into_iter().collect();
    while let Some(node) = pending.pop() {
        let Some(n) = model.nodes.get(node.index()) else {
            continue;
        };
        if let Some(poly) = model.node_polygon(node) {
            polys.push(poly);
        }
        // Reversed so the front subtree is visited first.
        pending.extend(n.coplanar);
        pending.extend(n.back);
        pending.extend(n.front);
    }
    if !surf_links {
        for (i, poly) in polys.iter_mut().enumerate() {
            poly.link = Some(LinkIndex::from_index(i));
        }
    }
    model.polys = polys;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brush::CsgOper;
    use cgmath::vec3;

    fn quad(x0: Real, x1: Real) -> Polygon {
        Polygon::from_vertices(vec![
            vec3(x0, 0.0, 0.0),
            vec3(x1, 0.0, 0.0),
            vec3(x1, 1.0, 0.0),
            vec3(x0, 1.0, 0.0),
        ])
    }

    #[test]
    fn adjacent_quads_merge_into_one() {
        let mut a = quad(0.0, 1.0);
        let mut b = quad(1.0, 2.0);
        assert!(try_to_merge(&mut a, &mut b));
        assert!(b.vertices.is_empty());
        assert_eq!(a.vertices.len(), 4);
        assert!((a.area() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn partial_edge_is_not_merged() {
        let mut a = quad(0.0, 1.0);
        let mut b = Polygon::from_vertices(vec![
            vec3(1.0, 0.0, 0.0),
            vec3(2.0, 0.0, 0.0),
            vec3(2.0, 0.5, 0.0),
            vec3(1.0, 0.5, 0.0),
        ]);
        // Shares only the corner (1, 0, 0) and half an edge.
        assert!(!try_to_merge(&mut a, &mut b));
        assert_eq!(b.vertices.len(), 4);
    }

    #[test]
    fn merge_coplanars_remaps_links() {
        let mut polys = vec![quad(0.0, 1.0), quad(1.0, 2.0), quad(2.0, 3.0), quad(5.0, 6.0)];
        for poly in polys.iter_mut() {
            poly.link = Some(LinkIndex::new(0));
        }
        polys[3].link = Some(LinkIndex::new(3));
        let removed = merge_coplanars(&mut polys, true, false);
        assert_eq!(removed, 2);
        assert_eq!(polys.len(), 2);
        assert!((polys[0].area() - 3.0).abs() < 1e-9);
        assert_eq!(polys[1].link, Some(LinkIndex::new(1)));
        assert!(polys.iter().all(|p| p.flags.contains(PolyFlags::ED_PROCESSED)));
    }

    #[test]
    fn validate_links_coplanar_faces() {
        let mut brush = Brush::new(vec![quad(0.0, 1.0), quad(3.0, 4.0)], CsgOper::Add);
        brush.polys.push(Polygon::from_vertices(vec![
            vec3(0.0, 0.0, 1.0),
            vec3(1.0, 0.0, 1.0),
            vec3(1.0, 1.0, 1.0),
        ]));
        assert_eq!(validate_brush(&mut brush, false), 1);
        assert_eq!(brush.polys[1].link, Some(LinkIndex::new(0)));
        assert_eq!(brush.polys[2].link, Some(LinkIndex::new(2)));
        assert_eq!(validate_brush(&mut brush, false), 0);
    }
}
