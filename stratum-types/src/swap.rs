//! Swap area state

use serde::{Deserialize, Serialize};

/// State of a swap area.
///
/// Total order: `Invalid < Inactive < Active(p)`, and active areas order by
/// ascending priority `p`. Listing code must compare states through this
/// order, never through raw priority sentinels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SwapState {
    /// Not a usable swap area (bad signature or unreadable)
    Invalid,

    /// A valid swap area that is not enabled
    Inactive,

    /// Enabled with the kernel-assigned priority
    Active(i32),
}

impl SwapState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_is_invalid_inactive_active() {
        assert!(SwapState::Invalid < SwapState::Inactive);
        assert!(SwapState::Inactive < SwapState::Active(-2));
        assert!(SwapState::Active(-2) < SwapState::Active(10));
    }
}
