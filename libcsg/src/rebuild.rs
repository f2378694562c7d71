use bsp::model::*;
use bsp::poly::PolyFlags;
use bsp::types::*;
use log::info;

use crate::bounds::build_bounds;
use crate::brush::{Brush, CsgOper};
use crate::build::build;
use crate::config::RebuildOptions;
use crate::context::{BuildContext, ProgressEventListener};
use crate::csg::{apply_csg, CsgOptions};
use crate::merge::{build_polys_from_tree, merge_coplanars};
use crate::optimize::{optimize_geometry, OptimizeReport};
use crate::stats::{calc_stats, TreeStats};
use crate::visibility::{compute_visibility, VisibilityReport};

#[derive(Debug, Clone, Default)]
pub struct RebuildReport {
    pub structural_brushes: usize,
    pub detail_brushes: usize,
    pub errors: u32,
    pub stats: TreeStats,
    pub visibility: Option<VisibilityReport>,
    pub optimize: Option<OptimizeReport>,
}

/// Semi-solid additive brushes are applied after the structural tree is final.
fn is_detail(brush: &Brush) -> bool {
    brush.flags.contains(PolyFlags::SEMISOLID)
        && !brush.flags.contains(PolyFlags::PORTAL)
        && brush.oper == CsgOper::Add
}

/// Rebuilds the geometry of `model` from `brushes`, in order.
///
/// Structural brushes and portals are composed first. The result is repartitioned from
/// its own polygons and zoned, then detail brushes are added and the geometry is
/// optimized and bounded. Portal brushes are applied as non-solid cutters; the caller's
/// brushes are left as they are.
pub fn csg_rebuild(
    model: &mut Model,
    brushes: &[Brush],
    options: &RebuildOptions,
    progress: &mut dyn ProgressEventListener,
) -> BspResult<RebuildReport> {
    let mut ctx = BuildContext::with_max_depth(options.max_depth);
    let mut report = RebuildReport::default();
    model.empty_model(EmptyFlags::ALL);

    let csg_options = CsgOptions {
        poly_flags: PolyFlags::empty(),
        build_bounds: false,
        merge_polys: true,
    };
    let total = brushes.len() as u32;
    for brush in brushes.iter().filter(|b| !is_detail(b)) {
        let mut brush = brush.clone();
        if brush.flags.contains(PolyFlags::PORTAL) {
            brush.flags = (brush.flags - PolyFlags::SEMISOLID) | PolyFlags::NOT_SOLID;
        }
        report.structural_brushes += 1;
        progress.progress(
            report.structural_brushes as u32,
            total,
            "Applying structural brushes".into(),
            "Applied structural brushes".into(),
        );
        apply_csg(model, &mut brush, &csg_options, &mut ctx)?;
    }

    progress.progress(0, 4, "Building polygons".into(), String::new());
    build_polys_from_tree(model, true);
    if options.merge_coplanars {
        progress.progress(1, 4, "Merging coplanars".into(), String::new());
        merge_coplanars(&mut model.polys, false, false);
    }
    progress.progress(2, 4, "Partitioning".into(), String::new());
    build(model, &mut ctx, &options.params)?;
    if options.compute_visibility {
        progress.progress(3, 4, "Building visibility zones".into(), String::new());
        report.visibility = Some(compute_visibility(model, &mut ctx)?);
    }
    progress.progress(4, 4, "Partitioning".into(), "Partitioned".into());

    for brush in brushes.iter().filter(|b| is_detail(b)) {
        let mut brush = brush.clone();
        report.detail_brushes += 1;
        progress.progress(
            (report.structural_brushes + report.detail_brushes) as u32,
            total,
            "Applying detail brushes".into(),
            "Applied detail brushes".into(),
        );
        apply_csg(model, &mut brush, &csg_options, &mut ctx)?;
    }

    if options.optimize_geometry {
        report.optimize = Some(optimize_geometry(model, &mut ctx)?);
    }
    build_bounds(model, &mut ctx)?;

    report.errors = ctx.errors;
    report.stats = calc_stats(model);
    info!(
        "Rebuilt {} structural and {} detail brushes: {} nodes, {} errors",
        report.structural_brushes, report.detail_brushes, report.stats.nodes, report.errors
    );
    Ok(report)
}
