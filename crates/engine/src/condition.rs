use engine_core::{JobId, JobStatus};

/// Narrow view of the registry that conditions need: job status lookup.
/// Implemented by [`crate::registry::JobRegistry`]; kept as a trait so
/// `Condition` does not need to depend on the registry's internal shape.
pub trait JobStatusLookup {
    fn status_of(&self, id: JobId) -> Option<JobStatus>;
}

type CustomPredicate = Box<dyn Fn(&dyn JobStatusLookup) -> bool + Send + Sync>;

/// Predicate gating a pending job's admission to running. Composites
/// short-circuit, evaluated in declaration order.
pub enum Condition {
    /// True iff the referenced job is `Done`.
    AfterAnother(JobId),
    /// True iff every referenced job has reached a terminal state.
    AfterOthers(Vec<JobId>),
    /// True iff every child condition is true.
    AllSatisfied(Vec<Condition>),
    /// True iff any child condition is true.
    AnySatisfied(Vec<Condition>),
    /// User-extended predicate over engine state.
    Custom(CustomPredicate),
}

impl std::fmt::Debug for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Condition::AfterAnother(id) => write!(f, "AfterAnother({id})"),
            Condition::AfterOthers(ids) => write!(f, "AfterOthers({ids:?})"),
            Condition::AllSatisfied(children) => write!(f, "AllSatisfied({children:?})"),
            Condition::AnySatisfied(children) => write!(f, "AnySatisfied({children:?})"),
            Condition::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

impl Condition {
    /// Conjoin `self` with `other`, collapsing into a single `AllSatisfied`
    /// when `other` is also a composite of the same kind is not attempted:
    /// this always nests one level, matching the reference behavior of
    /// combining an explicit condition with an auto-derived dependency one.
    pub fn and(self, other: Condition) -> Condition {
        Condition::AllSatisfied(vec![self, other])
    }

    pub fn satisfied(&self, lookup: &dyn JobStatusLookup) -> bool {
        match self {
            Condition::AfterAnother(id) => lookup.status_of(*id) == Some(JobStatus::Done),
            Condition::AfterOthers(ids) => ids
                .iter()
                .all(|id| lookup.status_of(*id).is_some_and(JobStatus::is_terminal)),
            Condition::AllSatisfied(children) => children.iter().all(|c| c.satisfied(lookup)),
            Condition::AnySatisfied(children) => children.iter().any(|c| c.satisfied(lookup)),
            Condition::Custom(f) => f(lookup),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FakeLookup(HashMap<JobId, JobStatus>);

    impl JobStatusLookup for FakeLookup {
        fn status_of(&self, id: JobId) -> Option<JobStatus> {
            self.0.get(&id).copied()
        }
    }

    #[test]
    fn after_another_requires_done() {
        let id = JobId::new();
        let lookup = FakeLookup(HashMap::from([(id, JobStatus::Running)]));
        assert!(!Condition::AfterAnother(id).satisfied(&lookup));

        let lookup = FakeLookup(HashMap::from([(id, JobStatus::Done)]));
        assert!(Condition::AfterAnother(id).satisfied(&lookup));
    }

    #[test]
    fn after_others_accepts_any_terminal_state() {
        let a = JobId::new();
        let b = JobId::new();
        let lookup = FakeLookup(HashMap::from([
            (a, JobStatus::Failed),
            (b, JobStatus::Cancelled),
        ]));
        assert!(Condition::AfterOthers(vec![a, b]).satisfied(&lookup));
    }

    #[test]
    fn missing_dependency_is_unsatisfiable() {
        let lookup = FakeLookup(HashMap::new());
        assert!(!Condition::AfterOthers(vec![JobId::new()]).satisfied(&lookup));
    }

    #[test]
    fn composites_short_circuit_correctly() {
        let a = JobId::new();
        let lookup = FakeLookup(HashMap::from([(a, JobStatus::Running)]));
        let all = Condition::AllSatisfied(vec![
            Condition::AfterAnother(a),
            Condition::Custom(Box::new(|_| panic!("should not evaluate"))),
        ]);
        assert!(!all.satisfied(&lookup));

        let any = Condition::AnySatisfied(vec![
            Condition::Custom(Box::new(|_| true)),
            Condition::Custom(Box::new(|_| panic!("should not evaluate"))),
        ]);
        assert!(any.satisfied(&lookup));
    }
}
