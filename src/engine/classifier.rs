//! Weight event classification
//!
//! Maps a shelf mass change to a semantic candidate event. This module never
//! touches storage: matching a candidate to a concrete book is the
//! committer's job because it depends on lease and inventory state.

use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Classification {
    /// Change within the noise floor; only the stored mass moves
    Noise { delta: i32 },
    /// Mass went down: something was taken off the shelf
    CandidateRemoval { delta: i32 },
    /// Mass went up: something was put on the shelf
    CandidateAddition { delta: i32 },
}

impl Classification {
    /// Signed change in grams (`new - previous`)
    pub fn delta(&self) -> i32 {
        match *self {
            Classification::Noise { delta }
            | Classification::CandidateRemoval { delta }
            | Classification::CandidateAddition { delta } => delta,
        }
    }

    /// Unsigned change in grams, compared against book masses
    pub fn magnitude(&self) -> i32 {
        self.delta().saturating_abs()
    }

    pub fn is_noise(&self) -> bool {
        matches!(self, Classification::Noise { .. })
    }
}

/// Classify a reading against the currently stored shelf mass
pub fn classify(previous_mass: i32, new_mass: i32, noise_floor: i32) -> Classification {
    let delta = new_mass.saturating_sub(previous_mass);
    if delta.saturating_abs() <= noise_floor {
        Classification::Noise { delta }
    } else if delta < 0 {
        Classification::CandidateRemoval { delta }
    } else {
        Classification::CandidateAddition { delta }
    }
}
