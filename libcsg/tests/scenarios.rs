use bsp::model::Model;
use bsp::poly::{Polygon, SplitResult};
use bsp::types::*;
use cgmath::{vec3, InnerSpace};
use csg::config::Optimization;
use csg::splitter::find_best_split;
use csg::{apply_csg, Brush, BuildContext, CsgOper, CsgOptions};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn apply(world: &mut Model, brush: &mut Brush) -> u32 {
    let mut ctx = BuildContext::new();
    apply_csg(world, brush, &CsgOptions::default(), &mut ctx).unwrap().errors
}

#[test]
fn split_pieces_stay_on_their_side() {
    init();
    let poly = Polygon::from_vertices(vec![
        vec3(-1.0, -1.0, 0.3),
        vec3(2.0, -1.0, 0.3),
        vec3(2.5, 1.5, 0.3),
        vec3(-0.5, 2.0, 0.3),
    ]);
    let base = vec3(0.7, 0.0, 0.0);
    let normal = vec3(1.0, 0.2, 0.0).normalize();

    let SplitResult::Split { front, back } = poly.split_with_plane(&base, &normal, false) else {
        panic!("polygon should straddle the plane");
    };
    let eps = THRESH_SPLIT_POLY_WITH_PLANE;
    assert!(front.vertices.iter().all(|v| (v - base).dot(normal) >= -eps));
    assert!(back.vertices.iter().all(|v| (v - base).dot(normal) <= eps));
    assert!((front.area() + back.area() - poly.area()).abs() < 1e-9);

    // One new edge, shared by both halves, lies on the plane.
    let on_plane = |p: &Polygon| p.vertices.iter().filter(|v| (*v - base).dot(normal).abs() < eps).count();
    assert_eq!(on_plane(&front), 2);
    assert_eq!(on_plane(&back), 2);
    for v in front.vertices.iter().filter(|v| (*v - base).dot(normal).abs() < eps) {
        assert!(back.vertices.iter().any(|w| points_are_same(v, w)));
    }
}

#[test]
fn splitter_prefers_the_orthogonal_polygon() {
    init();
    let quad = |x: Real| {
        Polygon::from_vertices(vec![
            vec3(x, 0.0, 0.0),
            vec3(x + 1.0, 0.0, 0.0),
            vec3(x + 1.0, 1.0, 0.0),
            vec3(x, 1.0, 0.0),
        ])
    };
    let mut pool: Vec<Polygon> = (0..4).map(|i| quad(i as Real * 2.0)).collect();
    pool.push(Polygon::from_vertices(vec![
        vec3(-5.0, 0.0, -1.0),
        vec3(-5.0, 1.0, -1.0),
        vec3(-5.0, 1.0, 1.0),
        vec3(-5.0, 0.0, 1.0),
    ]));
    assert_eq!(find_best_split(&pool, Optimization::Optimal, 15, 70), Some(4));
}

#[test]
fn overlapping_cubes_add_to_a_solid_union() {
    init();
    let mut world = Model::new(true);
    assert_eq!(apply(&mut world, &mut Brush::cube(vec3(0.0, 0.0, 0.0), 1.0, CsgOper::Add)), 0);
    assert_eq!(apply(&mut world, &mut Brush::cube(vec3(0.5, 0.0, 0.0), 1.0, CsgOper::Add)), 0);
    assert!(!world.point_outside(&vec3(0.25, 0.0, 0.0)));
    assert!(world.point_outside(&vec3(1.25, 0.0, 0.0)));
}

#[test]
fn intersect_yields_the_overlap_box() {
    init();
    let mut world = Model::new(true);
    apply(&mut world, &mut Brush::cube(vec3(0.0, 0.0, 0.0), 1.0, CsgOper::Add));
    let mut brush = Brush::cube(vec3(0.5, 0.0, 0.0), 1.0, CsgOper::Intersect);
    assert_eq!(apply(&mut world, &mut brush), 0);

    let bound = brush.bound();
    assert!((bound.min - vec3(0.0, -0.5, -0.5)).magnitude() < 1e-6);
    assert!((bound.max - vec3(0.5, 0.5, 0.5)).magnitude() < 1e-6);
    assert!(brush.is_outward());
}

#[test]
fn add_then_subtract_restores_classification() {
    init();
    let mut world = Model::new(true);
    apply(&mut world, &mut Brush::cube(vec3(0.0, 0.0, 0.0), 2.0, CsgOper::Add));

    let samples: Vec<Point3> = (-6..=14)
        .flat_map(|x| (-3..=3).map(move |y| vec3(x as Real * 0.45 + 0.01, y as Real * 0.45 + 0.02, 0.03)))
        .collect();
    let before: Vec<bool> = samples.iter().map(|p| world.point_outside(p)).collect();

    let mut other = Brush::cube(vec3(4.0, 0.0, 0.0), 1.5, CsgOper::Add);
    apply(&mut world, &mut other);
    assert!(!world.point_outside(&vec3(4.0, 0.0, 0.0)));

    other.oper = CsgOper::Subtract;
    apply(&mut world, &mut other);
    let after: Vec<bool> = samples.iter().map(|p| world.point_outside(p)).collect();
    for ((p, b), a) in samples.iter().zip(before).zip(after) {
        assert_eq!(b, a, "classification changed at {:?}", p);
    }
}

#[test]
fn degenerate_brush_counts_errors_instead_of_failing() {
    init();
    let mut world = Model::new(true);
    apply(&mut world, &mut Brush::cube(vec3(0.0, 0.0, 0.0), 1.0, CsgOper::Add));
    // A sliver thinner than the split threshold.
    let mut sliver = Brush::cuboid(vec3(0.2, -2.0, -2.0), vec3(0.2005, 2.0, 2.0), CsgOper::Add);
    let mut ctx = BuildContext::new();
    assert!(apply_csg(&mut world, &mut sliver, &CsgOptions::default(), &mut ctx).is_ok());
    assert!(!world.point_outside(&vec3(0.0, 0.0, 0.0)));
}

#[test]
fn degenerate_faces_are_counted_and_dropped() {
    init();
    let collapsed = || Polygon::from_vertices(vec![vec3(0.0, 0.0, 0.0), vec3(1.0, 0.0, 0.0), vec3(1.0, 0.0, 0.0)]);
    let line = || Polygon::from_vertices(vec![vec3(0.0, 0.0, 0.0), vec3(0.1, 0.0, 0.0), vec3(0.2, 0.0, 0.0)]);

    let mut staging = vec![collapsed(), line()];
    staging.extend(csg::brush::box_faces(&BoxF {
        min: vec3(-1.0, -1.0, -1.0),
        max: vec3(1.0, 1.0, 1.0),
    }));
    let mut world = Model::from_polys(staging, true);
    let mut ctx = BuildContext::new();
    let report = csg::build(&mut world, &mut ctx, &csg::BuildParams::default()).unwrap();
    assert_eq!(report.errors, 2);
    assert!(!world.point_outside(&vec3(0.5, 0.5, 0.5)));
    assert!(world.point_outside(&vec3(3.0, 0.0, 0.0)));

    let mut hole = Brush::cube(vec3(0.0, 0.0, 0.0), 1.0, CsgOper::Subtract);
    hole.polys.insert(0, line());
    hole.polys.push(collapsed());
    let report = apply_csg(&mut world, &mut hole, &CsgOptions::default(), &mut ctx).unwrap();
    assert_eq!(report.errors, 2);
    assert!(world.point_outside(&vec3(0.0, 0.0, 0.0)));
    assert!(!world.point_outside(&vec3(0.75, 0.0, 0.0)));
}
