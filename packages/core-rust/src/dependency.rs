//! Dependency graph resolution for ordered pipeline steps.
//!
//! Steps declare "insert before X" / "insert after X" constraints. Each
//! constraint is either required (the target must exist) or best-effort
//! (silently dropped when the target is absent). [`resolve_order`] turns the
//! constraint set into one deterministic total order: a stable topological
//! sort where ties are broken by registration order.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

// ---------------------------------------------------------------------------
// Constraint types
// ---------------------------------------------------------------------------

/// Position of a step relative to the constraint target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Direction {
    Before,
    After,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Before => f.write_str("before"),
            Self::After => f.write_str("after"),
        }
    }
}

/// A single ordering constraint declared by a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dependency {
    pub target: String,
    pub direction: Direction,
    pub required: bool,
}

impl Dependency {
    /// The declaring step runs before `target`.
    pub fn before(target: impl Into<String>, required: bool) -> Self {
        Self {
            target: target.into(),
            direction: Direction::Before,
            required,
        }
    }

    /// The declaring step runs after `target`.
    pub fn after(target: impl Into<String>, required: bool) -> Self {
        Self {
            target: target.into(),
            direction: Direction::After,
            required,
        }
    }
}

/// Anything that can be placed in a resolved order.
pub trait OrderedStep {
    /// Unique identifier of the step.
    fn step_id(&self) -> &str;

    /// Ordering constraints in declaration order.
    fn dependencies(&self) -> &[Dependency];
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Reasons a step set cannot be ordered.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("step '{step}' must run {direction} '{target}', but no step '{target}' is registered")]
    MissingDependency {
        step: String,
        target: String,
        direction: Direction,
    },
    #[error("step '{0}' is registered more than once")]
    DuplicateStep(String),
    #[error("step ordering contains a cycle: {}", format_cycle(.participants))]
    Cycle { participants: Vec<String> },
}

fn format_cycle(participants: &[String]) -> String {
    match participants.first() {
        Some(first) => format!("{} -> {first}", participants.join(" -> ")),
        None => String::new(),
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Resolves the execution order of `steps`.
///
/// Returns indices into `steps`. Among steps whose predecessors have all been
/// placed, the one registered first is placed next, so identical input always
/// yields the identical order.
///
/// # Errors
///
/// - [`GraphError::DuplicateStep`] if two steps share an id.
/// - [`GraphError::MissingDependency`] if a required constraint names an unknown step.
/// - [`GraphError::Cycle`] if the constraints cannot be satisfied together.
pub fn resolve_order<S: OrderedStep>(steps: &[S]) -> Result<Vec<usize>, GraphError> {
    let mut index_of: HashMap<&str, usize> = HashMap::with_capacity(steps.len());
    for (idx, step) in steps.iter().enumerate() {
        if index_of.insert(step.step_id(), idx).is_some() {
            return Err(GraphError::DuplicateStep(step.step_id().to_string()));
        }
    }

    let n = steps.len();
    let mut successors: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); n];
    let mut predecessors: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); n];

    for (idx, step) in steps.iter().enumerate() {
        for dep in step.dependencies() {
            let Some(&target) = index_of.get(dep.target.as_str()) else {
                if dep.required {
                    return Err(GraphError::MissingDependency {
                        step: step.step_id().to_string(),
                        target: dep.target.clone(),
                        direction: dep.direction,
                    });
                }
                debug!(
                    step = step.step_id(),
                    target = %dep.target,
                    "dropping best-effort ordering constraint on unregistered step"
                );
                continue;
            };

            let (from, to) = match dep.direction {
                Direction::Before => (idx, target),
                Direction::After => (target, idx),
            };
            successors[from].insert(to);
            predecessors[to].insert(from);
        }
    }

    let mut in_degree: Vec<usize> = predecessors.iter().map(BTreeSet::len).collect();
    let mut ready: BTreeSet<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(n);

    while let Some(next) = ready.pop_first() {
        order.push(next);
        for &succ in &successors[next] {
            in_degree[succ] -= 1;
            if in_degree[succ] == 0 {
                ready.insert(succ);
            }
        }
    }

    if order.len() == n {
        return Ok(order);
    }

    let cycle = find_cycle(&predecessors, &in_degree);
    Err(GraphError::Cycle {
        participants: cycle
            .into_iter()
            .map(|i| steps[i].step_id().to_string())
            .collect(),
    })
}

/// Extracts one cycle from the nodes left unplaced by the topological sort.
///
/// Every unplaced node still has an unplaced predecessor, so walking
/// predecessors from any unplaced node must eventually revisit a node. The
/// walk always takes the lowest-indexed candidate to stay deterministic.
fn find_cycle(predecessors: &[BTreeSet<usize>], in_degree: &[usize]) -> Vec<usize> {
    let unplaced = |i: usize| in_degree[i] > 0;
    let Some(start) = (0..in_degree.len()).find(|&i| unplaced(i)) else {
        return Vec::new();
    };

    let mut path = vec![start];
    let mut position: HashMap<usize, usize> = HashMap::from([(start, 0)]);
    let mut current = start;

    loop {
        let Some(&pred) = predecessors[current].iter().find(|&&p| unplaced(p)) else {
            return path;
        };
        if let Some(&pos) = position.get(&pred) {
            // path[pos..] was walked against edge direction; reverse it to
            // list participants in execution-constraint order.
            let mut cycle = path.split_off(pos);
            cycle.reverse();
            let min_at = cycle
                .iter()
                .enumerate()
                .min_by_key(|&(_, node)| *node)
                .map_or(0, |(i, _)| i);
            cycle.rotate_left(min_at);
            return cycle;
        }
        position.insert(pred, path.len());
        path.push(pred);
        current = pred;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[derive(Debug, Clone)]
    struct TestStep {
        id: String,
        deps: Vec<Dependency>,
    }

    impl TestStep {
        fn new(id: &str) -> Self {
            Self {
                id: id.to_string(),
                deps: Vec::new(),
            }
        }

        fn before(mut self, target: &str) -> Self {
            self.deps.push(Dependency::before(target, true));
            self
        }

        fn after(mut self, target: &str) -> Self {
            self.deps.push(Dependency::after(target, true));
            self
        }

        fn after_if_exists(mut self, target: &str) -> Self {
            self.deps.push(Dependency::after(target, false));
            self
        }
    }

    impl OrderedStep for TestStep {
        fn step_id(&self) -> &str {
            &self.id
        }

        fn dependencies(&self) -> &[Dependency] {
            &self.deps
        }
    }

    fn ids(steps: &[TestStep], order: &[usize]) -> Vec<String> {
        order.iter().map(|&i| steps[i].id.clone()).collect()
    }

    #[test]
    fn unconstrained_steps_keep_registration_order() {
        let steps = vec![TestStep::new("a"), TestStep::new("b"), TestStep::new("c")];
        let order = resolve_order(&steps).unwrap();
        assert_eq!(ids(&steps, &order), vec!["a", "b", "c"]);
    }

    #[test]
    fn before_and_after_constraints_are_honored() {
        let steps = vec![
            TestStep::new("a").after("c"),
            TestStep::new("b"),
            TestStep::new("c"),
            TestStep::new("d").before("b"),
        ];
        let order = resolve_order(&steps).unwrap();
        assert_eq!(ids(&steps, &order), vec!["c", "a", "d", "b"]);
    }

    #[test]
    fn missing_required_dependency_names_target() {
        let steps = vec![TestStep::new("a").before("ghost")];
        let err = resolve_order(&steps).unwrap_err();
        assert_eq!(
            err,
            GraphError::MissingDependency {
                step: "a".to_string(),
                target: "ghost".to_string(),
                direction: Direction::Before,
            }
        );
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn missing_best_effort_dependency_is_dropped() {
        let steps = vec![TestStep::new("a").after_if_exists("ghost"), TestStep::new("b")];
        let order = resolve_order(&steps).unwrap();
        assert_eq!(ids(&steps, &order), vec!["a", "b"]);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let steps = vec![TestStep::new("a"), TestStep::new("a")];
        assert_eq!(
            resolve_order(&steps).unwrap_err(),
            GraphError::DuplicateStep("a".to_string())
        );
    }

    #[test]
    fn cycle_reports_participants() {
        let steps = vec![
            TestStep::new("free"),
            TestStep::new("a").before("b"),
            TestStep::new("b").before("c"),
            TestStep::new("c").before("a"),
        ];
        let err = resolve_order(&steps).unwrap_err();
        match &err {
            GraphError::Cycle { participants } => {
                assert_eq!(participants, &vec!["a", "b", "c"]);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
        assert_eq!(
            err.to_string(),
            "step ordering contains a cycle: a -> b -> c -> a"
        );
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let steps = vec![TestStep::new("a").after("a")];
        assert!(matches!(
            resolve_order(&steps),
            Err(GraphError::Cycle { participants }) if participants == vec!["a"]
        ));
    }

    #[test]
    fn cycle_does_not_report_downstream_nodes() {
        let steps = vec![
            TestStep::new("a").before("b"),
            TestStep::new("b").before("a"),
            TestStep::new("tail").after("b"),
        ];
        match resolve_order(&steps) {
            Err(GraphError::Cycle { participants }) => {
                assert_eq!(participants, vec!["a", "b"]);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    /// Generates acyclic step sets: every constraint points from a lower
    /// registration index to a higher one.
    fn acyclic_steps() -> impl Strategy<Value = Vec<TestStep>> {
        (1usize..12).prop_flat_map(|n| {
            proptest::collection::vec((0..n, 0..n, any::<bool>()), 0..(n * 2)).prop_map(
                move |edges| {
                    let mut steps: Vec<TestStep> =
                        (0..n).map(|i| TestStep::new(&format!("s{i}"))).collect();
                    for (x, y, use_before) in edges {
                        if x == y {
                            continue;
                        }
                        let (lo, hi) = (x.min(y), x.max(y));
                        if use_before {
                            let target = format!("s{hi}");
                            steps[lo].deps.push(Dependency::before(target, true));
                        } else {
                            let target = format!("s{lo}");
                            steps[hi].deps.push(Dependency::after(target, true));
                        }
                    }
                    steps
                },
            )
        })
    }

    proptest! {
        #[test]
        fn resolved_order_satisfies_every_constraint(steps in acyclic_steps()) {
            let order = resolve_order(&steps).unwrap();
            prop_assert_eq!(order.len(), steps.len());

            let position: HashMap<&str, usize> = order
                .iter()
                .enumerate()
                .map(|(pos, &i)| (steps[i].id.as_str(), pos))
                .collect();

            for step in &steps {
                for dep in &step.deps {
                    let own = position[step.id.as_str()];
                    let other = position[dep.target.as_str()];
                    match dep.direction {
                        Direction::Before => prop_assert!(own < other),
                        Direction::After => prop_assert!(own > other),
                    }
                }
            }
        }

        #[test]
        fn resolution_is_idempotent(steps in acyclic_steps()) {
            let first = resolve_order(&steps).unwrap();
            let second = resolve_order(&steps).unwrap();
            prop_assert_eq!(first, second);
        }

        #[test]
        fn closing_a_loop_always_fails(steps in acyclic_steps(), a in 0usize..12, b in 0usize..12) {
            let n = steps.len();
            let (a, b) = (a % n, b % n);
            prop_assume!(a != b);

            let mut steps = steps;
            let a_id = steps[a].id.clone();
            let b_id = steps[b].id.clone();
            steps[a].deps.push(Dependency::before(b_id, true));
            steps[b].deps.push(Dependency::before(a_id, true));

            let is_cycle = matches!(resolve_order(&steps), Err(GraphError::Cycle { .. }));
            prop_assert!(is_cycle);
        }
    }
}
