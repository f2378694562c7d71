use bsp::types::{BspError, BspResult};
use serde::Deserialize;

/// How hard the splitter search works.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Optimization {
    /// Sample roughly a quarter of the pool.
    Lame,
    /// Sample roughly a twentieth of the pool.
    Good,
    /// Try every polygon.
    Optimal,
}

impl Optimization {
    /// Candidate stride for a pool of `num_polys`.
    pub fn stride(self, num_polys: usize) -> usize {
        match self {
            Optimization::Optimal => 1,
            Optimization::Good => (num_polys / 20).max(1),
            Optimization::Lame => (num_polys / 4).max(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum BuildMode {
    /// Keep points, vectors and surfaces; polygons reference surfaces through their links.
    Preserve,
    /// Start from the staging polygons alone; every splitter opens a surface shared
    /// by its coplanars.
    Relink,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct BuildParams {
    pub optimization: Optimization,
    /// 0 ignores front/back balance, 100 ignores split count.
    pub balance: u8,
    /// 0-100 discount applied to portal splitters.
    pub portal_bias: u8,
    pub mode: BuildMode,
}

impl Default for BuildParams {
    fn default() -> Self {
        BuildParams {
            optimization: Optimization::Optimal,
            balance: 15,
            portal_bias: 70,
            mode: BuildMode::Preserve,
        }
    }
}

impl BuildParams {
    /// Parameters used for the throwaway tree of a CSG operand.
    pub fn brush() -> Self {
        BuildParams {
            optimization: Optimization::Lame,
            balance: 0,
            portal_bias: 70,
            mode: BuildMode::Relink,
        }
    }

    pub fn from_xml(xml: &str) -> BspResult<Self> {
        let params: BuildParams = quick_xml::de::from_str(xml)
            .map_err(|e| BspError::from(format!("Invalid build parameters: {}", e)))?;
        params.validated()
    }

    pub fn validated(self) -> BspResult<Self> {
        if self.balance > 100 || self.portal_bias > 100 {
            return Err(BspError::from("Weights must lie in 0..=100"));
        }
        Ok(self)
    }
}

/// Options for a full geometry rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct RebuildOptions {
    pub params: BuildParams,
    pub merge_coplanars: bool,
    pub compute_visibility: bool,
    pub optimize_geometry: bool,
    pub max_depth: u32,
}

impl Default for RebuildOptions {
    fn default() -> Self {
        RebuildOptions {
            params: BuildParams::default(),
            merge_coplanars: true,
            compute_visibility: true,
            optimize_geometry: true,
            max_depth: crate::context::DEFAULT_MAX_DEPTH,
        }
    }
}

impl RebuildOptions {
    pub fn from_xml(xml: &str) -> BspResult<Self> {
        let options: RebuildOptions = quick_xml::de::from_str(xml)
            .map_err(|e| BspError::from(format!("Invalid rebuild options: {}", e)))?;
        options.params.validated()?;
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stride_per_level() {
        assert_eq!(Optimization::Optimal.stride(100), 1);
        assert_eq!(Optimization::Good.stride(100), 5);
        assert_eq!(Optimization::Lame.stride(100), 25);
        assert_eq!(Optimization::Lame.stride(3), 1);
    }

    #[test]
    fn params_from_xml() {
        let params = BuildParams::from_xml(
            "<BuildParams><optimization>Good</optimization><balance>40</balance></BuildParams>",
        )
        .unwrap();
        assert_eq!(params.optimization, Optimization::Good);
        assert_eq!(params.balance, 40);
        assert_eq!(params.portal_bias, 70);
        assert_eq!(params.mode, BuildMode::Preserve);

        assert!(BuildParams::from_xml("<BuildParams><balance>140</balance></BuildParams>").is_err());
    }

    #[test]
    fn rebuild_options_from_xml() {
        let options = RebuildOptions::from_xml(
            "<RebuildOptions><optimize_geometry>false</optimize_geometry><max_depth>64</max_depth></RebuildOptions>",
        )
        .unwrap();
        assert!(!options.optimize_geometry);
        assert!(options.merge_coplanars);
        assert_eq!(options.max_depth, 64);
    }
}
