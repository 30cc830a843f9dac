// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! Adaptive "fix needed" state of a module.
//!
//! Each repair category is probed on first use: the first repair outcome
//! that can be decided is recorded and trusted for the rest of the module
//! lifetime. Once a category is known not to need fixing, outputs of that
//! category are passed through without being parsed at all.

use std::sync::{Mutex, MutexGuard};

use log::{debug, trace};

/// The categories of token output that may be repaired
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FixKind {
    EcPoint,
    Ecdsa,
    Sm2,
}

impl FixKind {
    fn index(self) -> usize {
        match self {
            FixKind::EcPoint => 0,
            FixKind::Ecdsa => 1,
            FixKind::Sm2 => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FixState {
    Unknown,
    Needed,
    NotNeeded,
}

/// Outcome of a single repair attempt
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Repair {
    /// The input is already well formed
    Unchanged,
    /// The input was malformed, this is the repaired value
    Fixed(Vec<u8>),
    /// The input could not be classified (unknown curve, unparseable or
    /// oversized data); it is passed through untouched
    Undecided,
}

#[derive(Debug)]
pub struct AdaptiveFixes {
    adaptive: bool,
    flags: Mutex<[FixState; 3]>,
}

impl AdaptiveFixes {
    pub fn new(adaptive: bool) -> AdaptiveFixes {
        AdaptiveFixes {
            adaptive: adaptive,
            flags: Mutex::new([FixState::Unknown; 3]),
        }
    }

    fn flags(&self) -> MutexGuard<'_, [FixState; 3]> {
        /* the flags are plain values, a poisoned lock holds valid data */
        match self.flags.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn state(&self, kind: FixKind) -> FixState {
        self.flags()[kind.index()]
    }

    /// Runs `repair` over `input` unless the category is known not to
    /// need fixing, and records the outcome of the first decidable probe.
    ///
    /// The repair runs without holding the lock; when two threads race on
    /// the first probe only the first flag write is kept, both results
    /// are returned to their callers.
    pub fn apply<F>(
        &self,
        kind: FixKind,
        input: Vec<u8>,
        repair: F,
    ) -> Vec<u8>
    where
        F: FnOnce(&[u8]) -> Repair,
    {
        let state = self.state(kind);
        if self.adaptive && state == FixState::NotNeeded {
            trace!("{:?} fix not needed, passing through", kind);
            return input;
        }

        let outcome = repair(&input);

        if self.adaptive && state == FixState::Unknown {
            let observed = match outcome {
                Repair::Fixed(_) => Some(FixState::Needed),
                Repair::Unchanged => Some(FixState::NotNeeded),
                Repair::Undecided => None,
            };
            if let Some(observed) = observed {
                let mut flags = self.flags();
                if flags[kind.index()] == FixState::Unknown {
                    debug!("{:?} fix state set to {:?}", kind, observed);
                    flags[kind.index()] = observed;
                }
            }
        }

        match outcome {
            Repair::Fixed(fixed) => {
                trace!(
                    "{:?} repaired ({} -> {} bytes)",
                    kind,
                    input.len(),
                    fixed.len()
                );
                fixed
            }
            Repair::Unchanged | Repair::Undecided => input,
        }
    }
}
