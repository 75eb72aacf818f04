//! OUT pump blocked-by-filter latch.
//!
//! Sets after `level < block_level ∧ wear ≥ block_wear` has held for
//! `block_confirm_s`; clears after `wear ≤ unblock_wear` has held for
//! `unblock_confirm_s`. Each timer restarts from zero whenever its condition
//! lapses, so a single noisy tick cannot toggle the latch.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use validator::Validate;

use crate::domain::InterlockState;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct OutBlockConfig {
    /// Level below which a fouled filter blocks the OUT pump (%)
    #[validate(range(min = 0.0, max = 100.0))]
    pub block_level_pct: f64,
    /// Wear at or above which the block condition holds (%)
    #[validate(range(min = 0.0, max = 100.0))]
    pub block_wear_pct: f64,
    /// Wear at or below which the latch may clear (%)
    #[validate(range(min = 0.0, max = 100.0))]
    pub unblock_wear_pct: f64,
    #[validate(range(min = 0.0))]
    pub block_confirm_s: f64,
    #[validate(range(min = 0.0))]
    pub unblock_confirm_s: f64,
}

impl Default for OutBlockConfig {
    fn default() -> Self {
        Self {
            block_level_pct: 20.0,
            block_wear_pct: 85.0,
            unblock_wear_pct: 50.0,
            block_confirm_s: 3.0,
            unblock_confirm_s: 3.0,
        }
    }
}

/// Latch transition produced by one update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatchEvent {
    Blocked,
    Released,
}

/// Advance the latch timers by `dt` and return a transition, if any
pub fn update_out_block(
    latch: &mut InterlockState,
    cfg: &OutBlockConfig,
    level_pct: f64,
    wear_pct: f64,
    dt: f64,
) -> Option<LatchEvent> {
    if dt <= 0.0 || !dt.is_finite() {
        return None;
    }

    if !latch.out_blocked_by_filter {
        latch.unblock_timer_s = 0.0;
        let want_block = level_pct < cfg.block_level_pct && wear_pct >= cfg.block_wear_pct;
        if !want_block {
            latch.block_timer_s = 0.0;
            return None;
        }
        latch.block_timer_s += dt;
        if latch.block_timer_s >= cfg.block_confirm_s {
            latch.out_blocked_by_filter = true;
            latch.block_timer_s = 0.0;
            warn!(level_pct, wear_pct, "OUT pump blocked by filter wear");
            return Some(LatchEvent::Blocked);
        }
    } else {
        latch.block_timer_s = 0.0;
        if wear_pct > cfg.unblock_wear_pct {
            latch.unblock_timer_s = 0.0;
            return None;
        }
        latch.unblock_timer_s += dt;
        if latch.unblock_timer_s >= cfg.unblock_confirm_s {
            latch.out_blocked_by_filter = false;
            latch.unblock_timer_s = 0.0;
            info!(level_pct, wear_pct, "OUT pump filter block released");
            return Some(LatchEvent::Released);
        }
    }
    None
}
