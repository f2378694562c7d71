pub mod bounds;
pub mod brush;
pub mod build;
pub mod config;
pub mod context;
pub mod csg;
pub mod filter;
pub mod merge;
pub mod optimize;
pub mod rebuild;
pub mod refresh;
pub mod splitter;
pub mod stats;
pub mod visibility;

pub use bounds::build_bounds;
pub use brush::{Brush, CsgOper};
pub use build::{build, build_with_progress, BuildReport};
pub use config::{BuildMode, BuildParams, Optimization, RebuildOptions};
pub use context::{BuildContext, NullProgress, ProgressEventListener};
pub use csg::{apply_csg, CsgOptions, CsgReport};
pub use optimize::{optimize_geometry, OptimizeReport};
pub use rebuild::{csg_rebuild, RebuildReport};
pub use refresh::{refresh, RefreshReport};
pub use stats::{calc_stats, TreeStats};
pub use visibility::{compute_visibility, leaf_at, VisibilityReport};

pub use bsp::model::Model;
pub use bsp::types::{BspError, BspResult};
