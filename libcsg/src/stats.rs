use bsp::model::*;

/// Shape of a tree, for judging how well a build balanced it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeStats {
    pub polys: usize,
    pub nodes: usize,
    pub max_depth: usize,
    /// Mean depth of childless nodes, rounded down.
    pub avg_depth: usize,
    /// Nodes with both children.
    pub branches: usize,
    pub coplanars: usize,
    /// Nodes with only a front child.
    pub fronts: usize,
    /// Nodes with only a back child.
    pub backs: usize,
    pub leaves: usize,
    pub front_leaves: usize,
    pub back_leaves: usize,
}

pub fn calc_stats(model: &Model) -> TreeStats {
    let mut stats = TreeStats {
        polys: model.surfaces.len(),
        nodes: model.nodes.len(),
        ..TreeStats::default()
    };
    let mut depth_sum = 0;
    // (node, is front child, depth)
    let mut pending: Vec<(NodeIndex, bool, usize)> = model.root().map(|r| (r, true, 0)).into_iter().collect();
    while let Some((index, is_front, depth)) = pending.pop() {
        let Some(node) = model.nodes.get(index.index()) else {
            continue;
        };
        stats.max_depth = stats.max_depth.max(depth);
        match (node.front, node.back) {
            (None, None) => {
                if depth > 0 {
                    if is_front {
                        stats.front_leaves += 1;
                    } else {
                        stats.back_leaves += 1;
                    }
                }
                stats.leaves += 1;
                depth_sum += depth;
            }
            (Some(front), None) => {
                stats.fronts += 1;
                pending.push((front, true, depth + 1));
            }
            (None, Some(back)) => {
                stats.backs += 1;
                pending.push((back, false, depth + 1));
            }
            (Some(front), Some(back)) => {
                stats.branches += 1;
                pending.push((back, false, depth + 1));
                pending.push((front, true, depth + 1));
            }
        }

        let mut coplanar = node.coplanar;
        while let Some(next) = coplanar {
            stats.coplanars += 1;
            coplanar = model.nodes.get(next.index()).and_then(|n| n.coplanar);
        }
    }
    if stats.leaves > 0 {
        stats.avg_depth = depth_sum / stats.leaves;
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brush::box_faces;
    use crate::build::build;
    use crate::config::BuildParams;
    use crate::context::BuildContext;
    use bsp::types::BoxF;
    use cgmath::vec3;

    #[test]
    fn box_is_a_front_chain() {
        let bound = BoxF {
            min: vec3(-1.0, -1.0, -1.0),
            max: vec3(1.0, 1.0, 1.0),
        };
        let mut model = Model::from_polys(box_faces(&bound), true);
        build(&mut model, &mut BuildContext::new(), &BuildParams::default()).unwrap();

        let stats = calc_stats(&model);
        assert_eq!(stats.nodes, 6);
        assert_eq!(stats.polys, 6);
        assert_eq!(stats.leaves, 1);
        assert_eq!(stats.max_depth, 5);
        assert_eq!(stats.avg_depth, 5);
        assert_eq!(stats.fronts + stats.backs, 5);
        assert_eq!(stats.branches, 0);
        assert_eq!(stats.coplanars, 0);
    }

    #[test]
    fn empty_tree_has_no_stats() {
        assert_eq!(calc_stats(&Model::default()), TreeStats::default());
    }
}
