//! Per-state algorithm record
//!
//! Every stored state carries an [`Extension`]. Only the worker that owns the
//! state ever reads or writes it.
//!
//! # Layout
//!
//! The counters and flags share one 32-bit word:
//!
//! ```text
//! bit  31   30   29 ........ 15   14 ........ 0
//!     in_f in_s   iteration (15)   pred_count (15)
//! ```
//!
//! `pred_count` saturating is a fatal error, never a wrap-around.
//! `iteration` is a superstep stamp compared for equality only, so it is
//! kept modulo 2^15.

use crate::error::CheckError;
use crate::store::StateRef;

const FIELD_BITS: u32 = 15;
const FIELD_MASK: u32 = (1 << FIELD_BITS) - 1;
const ITERATION_SHIFT: u32 = FIELD_BITS;
const IN_S_BIT: u32 = 1 << 30;
const IN_F_BIT: u32 = 1 << 31;

/// Largest representable predecessor count.
pub const MAX_PRED_COUNT: u32 = FIELD_MASK;

/// Reduce a superstep counter to the stored stamp width.
#[inline]
pub fn iteration_stamp(iteration: u32) -> u32 {
    iteration & FIELD_MASK
}

/// Algorithm-private data attached to a stored state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Extension {
    parent: Option<StateRef>,
    map: u32,
    word: u32,
}

impl Extension {
    /// First-seen predecessor, `None` for the initial state and unvisited states.
    #[inline]
    pub fn parent(&self) -> Option<StateRef> {
        self.parent
    }

    /// Record `parent` unless one is already set. Returns whether it was written.
    #[inline]
    pub fn set_parent_once(&mut self, parent: StateRef) -> bool {
        if self.parent.is_some() {
            return false;
        }
        self.parent = Some(parent);
        true
    }

    /// Overwrite the parent. Only the cycle trace does this.
    #[inline]
    pub fn replace_parent(&mut self, parent: StateRef) {
        self.parent = Some(parent);
    }

    /// Largest accepting-ancestor id propagated so far (single-worker heuristic).
    #[inline]
    pub fn map(&self) -> u32 {
        self.map
    }

    #[inline]
    pub fn set_map(&mut self, map: u32) {
        self.map = map;
    }

    #[inline]
    pub fn pred_count(&self) -> u32 {
        self.word & FIELD_MASK
    }

    #[inline]
    pub fn reset_pred_count(&mut self) {
        self.word &= !FIELD_MASK;
    }

    /// Count one more in-S predecessor of `state`.
    #[inline]
    pub fn increment_pred_count(&mut self, state: StateRef) -> Result<(), CheckError> {
        let count = self.pred_count();
        if count == MAX_PRED_COUNT {
            return Err(CheckError::PredCountOverflow {
                state,
                max: MAX_PRED_COUNT,
            });
        }
        self.word = (self.word & !FIELD_MASK) | (count + 1);
        Ok(())
    }

    /// Remove one predecessor of `state`, returning the new count.
    #[inline]
    pub fn decrement_pred_count(&mut self, state: StateRef) -> Result<u32, CheckError> {
        let count = self.pred_count();
        if count == 0 {
            return Err(CheckError::PredCountUnderflow { state });
        }
        self.word = (self.word & !FIELD_MASK) | (count - 1);
        Ok(count - 1)
    }

    /// Stamp of the last superstep that visited this state.
    #[inline]
    pub fn iteration(&self) -> u32 {
        (self.word >> ITERATION_SHIFT) & FIELD_MASK
    }

    #[inline]
    pub fn set_iteration(&mut self, iteration: u32) {
        self.word = (self.word & !(FIELD_MASK << ITERATION_SHIFT))
            | (iteration_stamp(iteration) << ITERATION_SHIFT);
    }

    /// Whether the state was stamped by superstep `iteration`.
    #[inline]
    pub fn visited_in(&self, iteration: u32) -> bool {
        self.iteration() == iteration_stamp(iteration)
    }

    /// Membership in the candidate set S.
    #[inline]
    pub fn in_s(&self) -> bool {
        self.word & IN_S_BIT != 0
    }

    #[inline]
    pub fn set_in_s(&mut self, in_s: bool) {
        if in_s {
            self.word |= IN_S_BIT;
        } else {
            self.word &= !IN_S_BIT;
        }
    }

    /// Membership in F, the accepting states. Fixed at first expansion.
    #[inline]
    pub fn in_f(&self) -> bool {
        self.word & IN_F_BIT != 0
    }

    #[inline]
    pub fn set_in_f(&mut self, in_f: bool) {
        if in_f {
            self.word |= IN_F_BIT;
        } else {
            self.word &= !IN_F_BIT;
        }
    }

    /// Whether the state seeds the next reachability pass.
    #[inline]
    pub fn is_seed(&self) -> bool {
        self.in_s() && self.in_f()
    }
}
