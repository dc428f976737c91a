//! Acknowledgement thresholds for consistency levels

use crate::common::{ConsistencyLevel, Result};

/// Minimum successful replica responses for `level` at replication `factor`
pub fn min_acks(factor: usize, level: ConsistencyLevel) -> Result<usize> {
    if factor < 1 {
        return Err(crate::Error::ValidationFailed(format!(
            "replication factor must be at least 1, got {}",
            factor
        )));
    }
    Ok(match level {
        ConsistencyLevel::One => 1,
        ConsistencyLevel::Quorum => factor / 2 + 1,
        ConsistencyLevel::All => factor,
    })
}
