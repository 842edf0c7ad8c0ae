//! Relative cost estimates used by schedulers to pick the cheapest capable worker.

use ferry_config::CostConfig;
use ferry_core::AccessorType;

const MIB: u64 = 1024 * 1024;

/// Size assumed when neither the expectation nor the source reports one.
pub const ASSUMED_SIZE_MIB: u64 = 100;

/// Speed classes per backend, scaled by transfer size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CostModel {
    costs: CostConfig,
}

impl CostModel {
    /// Model using the configured speed classes.
    #[must_use]
    pub const fn new(costs: CostConfig) -> Self {
        Self { costs }
    }

    /// Speed class of a backend; higher is slower.
    #[must_use]
    pub const fn speed_class(&self, accessor_type: AccessorType) -> u64 {
        match accessor_type {
            AccessorType::LocalFolder => self.costs.local_folder,
            AccessorType::MappedDrive => self.costs.mapped_drive,
            AccessorType::FileShare => self.costs.file_share,
            AccessorType::Http => self.costs.http,
            AccessorType::Tape => self.costs.tape,
            AccessorType::CorePackageInfo => 1,
        }
    }

    /// `speed_class × (1 + MiB)`, with the scan multiplier applied for scans.
    #[must_use]
    pub const fn estimate(&self, source: AccessorType, size_bytes: Option<u64>, scan: bool) -> u64 {
        let mib = match size_bytes {
            Some(bytes) => bytes.div_ceil(MIB),
            None => ASSUMED_SIZE_MIB,
        };
        let transfer = self.speed_class(source).saturating_mul(mib.saturating_add(1));
        if scan {
            transfer.saturating_mul(self.costs.scan)
        } else {
            transfer
        }
    }
}

impl Default for CostModel {
    fn default() -> Self {
        Self::new(CostConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_grows_with_size() {
        let model = CostModel::default();
        let small = model.estimate(AccessorType::LocalFolder, Some(MIB), false);
        let large = model.estimate(AccessorType::LocalFolder, Some(50 * MIB), false);
        assert_eq!(small, 2);
        assert_eq!(large, 51);
        assert!(large > small);
    }

    #[test]
    fn slower_backends_cost_more() {
        let model = CostModel::default();
        let local = model.estimate(AccessorType::LocalFolder, Some(MIB), false);
        let share = model.estimate(AccessorType::FileShare, Some(MIB), false);
        let tape = model.estimate(AccessorType::Tape, Some(MIB), false);
        assert!(local < share && share < tape);
    }

    #[test]
    fn unknown_size_is_assumed_and_scans_are_scaled() {
        let model = CostModel::default();
        assert_eq!(model.estimate(AccessorType::LocalFolder, None, false), 101);
        assert_eq!(model.estimate(AccessorType::LocalFolder, None, true), 202);
    }
}
