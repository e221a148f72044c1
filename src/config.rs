use crate::error::{LocatorError, Result};

pub const DEFAULT_DRIFT_FACTOR: f64 = 0.05;
pub const DEFAULT_STENCIL_REACH: usize = 1;
/// Largest supported stencil reach (a 5x5x5 block of cells).
pub const MAX_STENCIL_REACH: usize = 2;

/// Construction-time settings of a [`NeighborCellLocator`](crate::NeighborCellLocator).
#[derive(Clone, Debug, PartialEq)]
pub struct LocatorConfig {
    /// Interaction cutoff radius.
    pub cutoff: f64,
    /// Fraction of the cutoff a particle may drift before a rebuild is required.
    pub drift_factor: f64,
    /// Number of neighboring cells searched along each axis (1 gives 27 cells, 2 gives 125).
    pub stencil_reach: usize,
    /// Verbosity; rebuild summaries are emitted at `info` level when > 0.
    pub verbose: u8,
}

impl LocatorConfig {
    pub fn new(cutoff: f64) -> Self {
        Self {
            cutoff,
            drift_factor: DEFAULT_DRIFT_FACTOR,
            stencil_reach: DEFAULT_STENCIL_REACH,
            verbose: 0,
        }
    }

    pub fn with_drift_factor(mut self, drift_factor: f64) -> Self {
        self.drift_factor = drift_factor;
        self
    }

    pub fn with_stencil_reach(mut self, reach: usize) -> Self {
        self.stencil_reach = reach;
        self
    }

    pub fn with_verbose(mut self, verbose: u8) -> Self {
        self.verbose = verbose;
        self
    }

    /// Smallest allowed cell edge for a reach-1 stencil: `(1 + 2 drift) * cutoff`.
    pub fn min_box_size(&self) -> f64 {
        (1.0 + 2.0 * self.drift_factor) * self.cutoff
    }

    pub fn validate(&self) -> Result<()> {
        if !self.cutoff.is_finite() || self.cutoff <= 0.0 {
            return Err(LocatorError::InvalidConfig(
                "Cutoff must be positive and finite".to_string(),
            ));
        }
        if !self.drift_factor.is_finite() || self.drift_factor < 0.0 {
            return Err(LocatorError::InvalidConfig(
                "Drift factor must be non-negative and finite".to_string(),
            ));
        }
        if self.stencil_reach == 0 || self.stencil_reach > MAX_STENCIL_REACH {
            return Err(LocatorError::InvalidConfig(format!(
                "Stencil reach must be between 1 and {}",
                MAX_STENCIL_REACH
            )));
        }
        Ok(())
    }
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self::new(1.0)
    }
}
