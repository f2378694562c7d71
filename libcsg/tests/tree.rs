use std::io::Cursor;

use bsp::model::*;
use bsp::types::*;
use cgmath::vec3;
use csg::brush::box_faces;
use csg::config::BuildParams;
use csg::{apply_csg, build, optimize_geometry, refresh, Brush, BuildContext, CsgOper, CsgOptions};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A world with dead nodes and surfaces left behind by carving.
fn carved_world() -> Model {
    let mut world = Model::new(true);
    let mut ctx = BuildContext::new();
    let mut brushes = [
        Brush::cube(vec3(0.0, 0.0, 0.0), 2.0, CsgOper::Add),
        Brush::cube(vec3(1.0, 0.0, 0.0), 1.0, CsgOper::Subtract),
        Brush::cube(vec3(-0.5, 0.5, 0.0), 1.0, CsgOper::Add),
    ];
    for brush in brushes.iter_mut() {
        apply_csg(&mut world, brush, &CsgOptions::default(), &mut ctx).unwrap();
    }
    world
}

#[test]
fn refresh_is_idempotent() {
    init();
    let mut world = carved_world();
    refresh(&mut world, true).unwrap();
    let sizes = (
        world.nodes.len(),
        world.surfaces.len(),
        world.points.len(),
        world.vectors.len(),
        world.verts.len(),
    );
    let nodes = world.nodes.clone();

    let second = refresh(&mut world, true).unwrap();
    assert!(second.is_empty(), "second refresh removed {:?}", second);
    assert_eq!(
        sizes,
        (
            world.nodes.len(),
            world.surfaces.len(),
            world.points.len(),
            world.vectors.len(),
            world.verts.len()
        )
    );
    assert_eq!(nodes, world.nodes);
}

#[test]
fn refresh_leaves_only_reachable_entries() {
    init();
    let mut world = carved_world();
    let samples = [vec3(0.0, 0.0, 0.0), vec3(1.0, 0.0, 0.0), vec3(-0.9, 0.9, 0.0), vec3(3.0, 0.0, 0.0)];
    let before: Vec<bool> = samples.iter().map(|p| world.point_outside(p)).collect();
    refresh(&mut world, true).unwrap();
    let after: Vec<bool> = samples.iter().map(|p| world.point_outside(p)).collect();
    assert_eq!(before, after);

    let mut seen = vec![false; world.nodes.len()];
    let mut pending: Vec<NodeIndex> = world.root().into_iter().collect();
    while let Some(index) = pending.pop() {
        assert!(!seen[index.index()], "node {} reached twice", index);
        seen[index.index()] = true;
        let node = world.node(index).unwrap();
        pending.extend([node.front, node.back, node.coplanar].into_iter().flatten());
    }
    assert!(seen.iter().all(|s| *s));

    let mut surface_used = vec![false; world.surfaces.len()];
    let mut point_used = vec![false; world.points.len()];
    let mut vector_used = vec![false; world.vectors.len()];
    for node in world.nodes.iter() {
        surface_used[node.surface.index()] = true;
        for vert in world.node_vertices(node) {
            point_used[vert.point.index()] = true;
        }
    }
    for surface in world.surfaces.iter() {
        point_used[surface.base.index()] = true;
        for vector in [surface.normal, surface.texture_u, surface.texture_v] {
            vector_used[vector.index()] = true;
        }
    }
    assert!(surface_used.iter().all(|u| *u));
    assert!(point_used.iter().all(|u| *u));
    assert!(vector_used.iter().all(|u| *u));
}

#[test]
fn saved_model_loads_back() {
    init();
    let mut world = carved_world();
    optimize_geometry(&mut world, &mut BuildContext::new()).unwrap();

    let mut buf: Vec<u8> = Vec::new();
    world.save(&mut buf).unwrap();
    let loaded = Model::load(&mut Cursor::new(buf.clone())).unwrap();

    assert_eq!(loaded.nodes, world.nodes);
    assert_eq!(loaded.surfaces, world.surfaces);
    assert_eq!(loaded.points, world.points);
    assert_eq!(loaded.verts, world.verts);
    assert_eq!(loaded.leaf_hulls, world.leaf_hulls);
    assert_eq!(loaded.num_shared_sides, world.num_shared_sides);
    assert_eq!(loaded.root_outside, world.root_outside);

    // Cut short, the stream must fail rather than yield a partial model.
    buf.truncate(buf.len() / 2);
    assert!(Model::load(&mut Cursor::new(buf)).is_err());
}

#[test]
fn depth_guard_degrades_instead_of_overflowing() {
    init();
    let slabs: Vec<_> = (0..40)
        .flat_map(|i| {
            let z = i as Real * 0.1;
            box_faces(&BoxF {
                min: vec3(0.0, 0.0, z),
                max: vec3(1.0, 1.0, z + 0.05),
            })
        })
        .collect();
    let mut model = Model::from_polys(slabs, true);
    let mut ctx = BuildContext::with_max_depth(4);
    let report = build(&mut model, &mut ctx, &BuildParams::default()).unwrap();
    assert!(report.depth_limit_hits > 0);
    assert!(report.errors >= report.depth_limit_hits);

    // The tree that was built is still consistent.
    refresh(&mut model, true).unwrap();
    assert!(refresh(&mut model, true).unwrap().is_empty());
}

#[test]
fn optimizer_links_every_side_of_a_box() {
    init();
    let bound = BoxF {
        min: vec3(0.0, 0.0, 0.0),
        max: vec3(3.0, 2.0, 1.0),
    };
    let mut model = Model::from_polys(box_faces(&bound), true);
    let mut ctx = BuildContext::new();
    build(&mut model, &mut ctx, &BuildParams::default()).unwrap();
    let report = optimize_geometry(&mut model, &mut ctx).unwrap();
    assert_eq!(report.linked_sides, report.total_sides);
    assert_eq!(report.errors, 0);
    for node in model.nodes.iter() {
        assert!(model.node_vertices(node).iter().all(|v| v.side.is_some()));
    }
}
