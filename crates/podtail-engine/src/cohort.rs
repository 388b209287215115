use std::collections::HashSet;

use podtail_types::{Cohort, PodId};

/// Splits pods into those present at startup and those that appeared later
///
/// Every pod classified before [`seal`](Self::seal) is pre-existing; the set
/// is frozen afterwards, so the answer for a given pod never changes.
#[derive(Debug, Default)]
pub struct CohortClassifier {
    preexisting: HashSet<PodId>,
    sealed: bool,
}

impl CohortClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn classify(&mut self, pod: &PodId) -> Cohort {
        if !self.sealed {
            self.preexisting.insert(pod.clone());
            return Cohort::PreExisting;
        }
        if self.preexisting.contains(pod) {
            Cohort::PreExisting
        } else {
            Cohort::New
        }
    }

    /// End the initial listing phase
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn preexisting_count(&self) -> usize {
        self.preexisting.len()
    }
}
