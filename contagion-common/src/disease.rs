use serde::{Deserialize, Serialize};
use std::fmt;

/// Disease stage of a single agent in the SEIR model.
///
/// The discriminants double as the state codes uploaded to the contact kernel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u32)]
pub enum DiseaseState {
    #[default]
    Susceptible = 0,
    Exposed = 1,
    Infectious = 2,
    Recovered = 3,
}

impl DiseaseState {
    pub const COUNT: usize = 4;

    pub const ALL: [DiseaseState; DiseaseState::COUNT] = [
        DiseaseState::Susceptible,
        DiseaseState::Exposed,
        DiseaseState::Infectious,
        DiseaseState::Recovered,
    ];

    /// Position of this state in per-state arrays such as census counters.
    #[inline(always)]
    pub fn index(self) -> usize {
        self as usize
    }

    #[inline(always)]
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }

    /// The stage an expiring timer moves an agent into, if any.
    pub fn next(self) -> Option<Self> {
        match self {
            DiseaseState::Exposed => Some(DiseaseState::Infectious),
            DiseaseState::Infectious => Some(DiseaseState::Recovered),
            DiseaseState::Susceptible | DiseaseState::Recovered => None,
        }
    }

    /// Susceptible and recovered agents never carry a stage timer.
    pub fn is_terminal(self) -> bool {
        matches!(self, DiseaseState::Susceptible | DiseaseState::Recovered)
    }

    pub fn label(self) -> &'static str {
        match self {
            DiseaseState::Susceptible => "susceptible",
            DiseaseState::Exposed => "exposed",
            DiseaseState::Infectious => "infectious",
            DiseaseState::Recovered => "recovered",
        }
    }
}

impl fmt::Display for DiseaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip_and_reject_unknown() {
        for state in DiseaseState::ALL {
            assert_eq!(DiseaseState::from_code(state.code()), Some(state));
        }
        assert_eq!(DiseaseState::from_code(4), None);
    }

    #[test]
    fn only_exposed_and_infectious_progress() {
        assert_eq!(DiseaseState::Exposed.next(), Some(DiseaseState::Infectious));
        assert_eq!(DiseaseState::Infectious.next(), Some(DiseaseState::Recovered));
        assert_eq!(DiseaseState::Susceptible.next(), None);
        assert_eq!(DiseaseState::Recovered.next(), None);
        assert!(DiseaseState::Recovered.is_terminal());
        assert!(!DiseaseState::Exposed.is_terminal());
    }
}
