use bsp::model::*;
use bsp::poly::{Polygon, SplitResult};
use bsp::types::*;
use cgmath::InnerSpace;

use crate::context::BuildContext;

/// Where a filtered fragment ended up relative to the solid the tree describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolyFilter {
    Outside,
    Inside,
    /// Coplanar with a tree polygon, empty on both sides.
    CoplanarOutside,
    /// Coplanar with a tree polygon, solid on both sides.
    CoplanarInside,
    /// Coplanar, with solid behind the fragment and empty space in front of it.
    CospatialFacingOut,
    /// Coplanar, with empty space behind the fragment and solid in front of it.
    CospatialFacingIn,
}

impl PolyFilter {
    fn from_coplanar(leaf_outside: bool, front_outside: bool) -> PolyFilter {
        match (leaf_outside, front_outside) {
            (false, false) => PolyFilter::CoplanarInside,
            (true, true) => PolyFilter::CoplanarOutside,
            (false, true) => PolyFilter::CospatialFacingOut,
            (true, false) => PolyFilter::CospatialFacingIn,
        }
    }
}

/// Progress of a fragment that hit a coplanar node. It is first filtered through the
/// side its normal faces, then through the other side, and classified by both leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoplanarState {
    None,
    /// Filtering the front subtree; `back` is still to be visited.
    Front {
        original: NodeIndex,
        back: Option<NodeIndex>,
        back_outside: bool,
    },
    /// Filtering the back subtree; the front leaf's outside-ness is known.
    Back {
        original: NodeIndex,
        front_outside: bool,
    },
}

/// Receives every fragment that reaches a leaf.
pub trait FilterHandler {
    /// `node` and `place` say where a node for the fragment would be attached. For
    /// coplanar categories `node` is the coplanar node the fragment lies on.
    fn filtered(
        &mut self,
        tree: &mut Model,
        ctx: &mut BuildContext,
        node: Option<NodeIndex>,
        place: NodePlace,
        poly: Polygon,
        filter: PolyFilter,
    ) -> BspResult<()>;
}

/// Filters `poly` through `tree` from the root.
pub fn filter_poly(
    tree: &mut Model,
    ctx: &mut BuildContext,
    handler: &mut dyn FilterHandler,
    poly: Polygon,
) -> BspResult<()> {
    match tree.root() {
        None => {
            let filter = if tree.root_outside {
                PolyFilter::Outside
            } else {
                PolyFilter::Inside
            };
            handler.filtered(tree, ctx, None, NodePlace::Root, poly, filter)
        }
        Some(root) => {
            let outside = tree.root_outside;
            filter_ed_poly(tree, ctx, handler, root, poly, CoplanarState::None, outside, 0)
        }
    }
}

fn filter_leaf(
    tree: &mut Model,
    ctx: &mut BuildContext,
    handler: &mut dyn FilterHandler,
    node: NodeIndex,
    poly: Polygon,
    state: CoplanarState,
    leaf_outside: bool,
    place: NodePlace,
    depth: u32,
) -> BspResult<()> {
    match state {
        CoplanarState::None => {
            let filter = if leaf_outside {
                PolyFilter::Outside
            } else {
                PolyFilter::Inside
            };
            handler.filtered(tree, ctx, Some(node), place, poly, filter)
        }
        CoplanarState::Back {
            original,
            front_outside,
        } => {
            let filter = PolyFilter::from_coplanar(leaf_outside, front_outside);
            handler.filtered(tree, ctx, Some(original), NodePlace::Plane, poly, filter)
        }
        CoplanarState::Front {
            original,
            back,
            back_outside,
        } => {
            let front_outside = leaf_outside;
            match back {
                None => {
                    let filter = PolyFilter::from_coplanar(back_outside, front_outside);
                    handler.filtered(tree, ctx, Some(original), NodePlace::Plane, poly, filter)
                }
                Some(back) => filter_ed_poly(
                    tree,
                    ctx,
                    handler,
                    back,
                    poly,
                    CoplanarState::Back {
                        original,
                        front_outside,
                    },
                    back_outside,
                    depth + 1,
                ),
            }
        }
    }
}

/// Filters `poly` down the subtree at `node`, handing each leaf fragment to `handler`.
pub fn filter_ed_poly(
    tree: &mut Model,
    ctx: &mut BuildContext,
    handler: &mut dyn FilterHandler,
    mut node: NodeIndex,
    mut poly: Polygon,
    mut state: CoplanarState,
    mut outside: bool,
    mut depth: u32,
) -> BspResult<()> {
    loop {
        if !ctx.can_descend(depth, "Filtering") {
            return Ok(());
        }
        if poly.vertices.len() >= VERTEX_THRESHOLD {
            let other = poly.split_in_half();
            filter_ed_poly(tree, ctx, handler, node, other, state, outside, depth + 1)?;
        }

        let n = tree.node(node)?.clone();
        let split = poly.split_with_plane(&n.plane.origin(), &n.plane.normal, false);
        let split = match split {
            SplitResult::Coplanar if state != CoplanarState::None => {
                ctx.geometry_error("Fragment became coplanar again while filtering");
                SplitResult::Front
            }
            other => other,
        };

        match split {
            side @ (SplitResult::Front | SplitResult::Back) => {
                let front = matches!(side, SplitResult::Front);
                outside = n.child_outside(front, outside, NodeFlags::empty());
                let place = if front { NodePlace::Front } else { NodePlace::Back };
                match n.child(front) {
                    Some(child) => {
                        node = child;
                        depth += 1;
                    }
                    None => {
                        return filter_leaf(tree, ctx, handler, node, poly, state, outside, place, depth);
                    }
                }
            }
            SplitResult::Coplanar => {
                let csg = n.is_csg(NodeFlags::empty());
                let mut back_outside = outside;
                let mut new_front_outside = outside;
                let (our_front, our_back) = if n.plane.normal.dot(poly.normal) >= 0.0 {
                    if csg {
                        back_outside = false;
                        new_front_outside = true;
                    }
                    (n.front, n.back)
                } else {
                    if csg {
                        back_outside = true;
                        new_front_outside = false;
                    }
                    (n.back, n.front)
                };

                match (our_front, our_back) {
                    (None, None) => {
                        let state = CoplanarState::Back {
                            original: node,
                            front_outside: new_front_outside,
                        };
                        return filter_leaf(
                            tree,
                            ctx,
                            handler,
                            node,
                            poly,
                            state,
                            back_outside,
                            NodePlace::Plane,
                            depth,
                        );
                    }
                    (None, Some(back)) => {
                        state = CoplanarState::Back {
                            original: node,
                            front_outside: new_front_outside,
                        };
                        node = back;
                        outside = back_outside;
                    }
                    (Some(front), back) => {
                        state = CoplanarState::Front {
                            original: node,
                            back,
                            back_outside,
                        };
                        node = front;
                        outside = new_front_outside;
                    }
                }
                depth += 1;
            }
            SplitResult::Split { front, back } => {
                let (front_outside, back_outside) = if n.is_csg(NodeFlags::empty()) {
                    (true, false)
                } else {
                    (outside, outside)
                };

                match n.front {
                    Some(child) => {
                        filter_ed_poly(tree, ctx, handler, child, front, state, front_outside, depth + 1)?
                    }
                    None => filter_leaf(
                        tree,
                        ctx,
                        handler,
                        node,
                        front,
                        state,
                        front_outside,
                        NodePlace::Front,
                        depth,
                    )?,
                }

                // The front pass may have hung a node on this one.
                match tree.node(node)?.back {
                    Some(child) => {
                        return filter_ed_poly(tree, ctx, handler, child, back, state, back_outside, depth + 1)
                    }
                    None => {
                        return filter_leaf(
                            tree,
                            ctx,
                            handler,
                            node,
                            back,
                            state,
                            back_outside,
                            NodePlace::Back,
                            depth,
                        )
                    }
                }
            }
        }
    }
}
