use log::warn;

/// Recursion limit used when the caller does not pick one.
pub const DEFAULT_MAX_DEPTH: u32 = 4096;

pub trait ProgressEventListener {
    fn progress(&mut self, current: u32, total: u32, status: String, finish_status: String);
}

/// Listener that ignores every update.
pub struct NullProgress;

impl ProgressEventListener for NullProgress {
    fn progress(&mut self, _current: u32, _total: u32, _status: String, _finish_status: String) {}
}

/// State threaded through one operation: the non-fatal error tally and the depth guard.
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub errors: u32,
    pub max_depth: u32,
    /// How many branches were cut off by the depth guard.
    pub depth_limit_hits: u32,
}

impl Default for BuildContext {
    fn default() -> Self {
        BuildContext::new()
    }
}

impl BuildContext {
    pub fn new() -> BuildContext {
        BuildContext {
            errors: 0,
            max_depth: DEFAULT_MAX_DEPTH,
            depth_limit_hits: 0,
        }
    }

    pub fn with_max_depth(max_depth: u32) -> BuildContext {
        BuildContext {
            max_depth,
            ..BuildContext::new()
        }
    }

    /// Counts a non-fatal geometry defect.
    pub fn geometry_error(&mut self, what: &str) {
        self.errors += 1;
        warn!("{}", what);
    }

    /// False once `depth` passes the limit; the caller must stop descending.
    pub fn can_descend(&mut self, depth: u32, what: &str) -> bool {
        if depth <= self.max_depth {
            return true;
        }
        self.depth_limit_hits += 1;
        self.errors += 1;
        warn!("{}: recursion depth {} exceeds limit {}", what, depth, self.max_depth);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_guard_counts_errors() {
        let mut ctx = BuildContext::with_max_depth(2);
        assert!(ctx.can_descend(2, "test"));
        assert!(!ctx.can_descend(3, "test"));
        assert_eq!(ctx.errors, 1);
        assert_eq!(ctx.depth_limit_hits, 1);
        ctx.geometry_error("tiny side");
        assert_eq!(ctx.errors, 2);
    }
}
