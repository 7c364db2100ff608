//! Property tests for the component tree
//!
//! Tests invariants for:
//! - Dirty propagation: staging marks exactly the chain up to the root
//! - Commit atomicity: accepted components flip everything, rejected flip nothing
//! - Registry: every full name resolves to its own parameter

use ekpar::component::*;
use ekpar::parameter::{ParamReader, Parameter};
use ekpar::types::*;
use proptest::prelude::*;
use serde_json::Value;

// ============================================================================
// Strategies
// ============================================================================

/// Rejects odd values of either parameter
struct EvenOnly;

impl Verify for EvenOnly {
    fn verify_parameters(&self, parameters: &ParameterSet<'_>) -> Option<Warning> {
        let x = parameters.staged::<i64>("x")?;
        let y = parameters.staged::<i64>("y")?;
        (x % 2 != 0 || y % 2 != 0).then(|| Warning::new("odd"))
    }
}

/// Node `i` hangs under `parents[i - 1]`, reduced modulo `i`; node 0 is the root.
/// The flag selects the even-only hook.
fn shape() -> impl Strategy<Value = Vec<(prop::sample::Index, bool)>> {
    prop::collection::vec((any::<prop::sample::Index>(), any::<bool>()), 0..16)
}

struct Fixture {
    tree: ComponentTree,
    ids: Vec<ComponentId>,
    parents: Vec<Option<usize>>,
    strict: Vec<bool>,
    readers: Vec<(ParamReader<i64>, ParamReader<i64>)>,
}

fn build(shape: &[(prop::sample::Index, bool)]) -> Fixture {
    let mut tree = ComponentTree::new();
    let mut ids = Vec::new();
    let mut parents = Vec::new();
    let mut strict = Vec::new();
    let mut readers = Vec::new();

    let nodes = std::iter::once(None).chain(
        shape
            .iter()
            .enumerate()
            .map(|(i, (parent, even))| Some((parent.index(i + 1), *even))),
    );
    for (i, node) in nodes.enumerate() {
        let name = format!("n{}", i);
        let (parent, even) = match node {
            Some((parent, even)) => (Some(parent), even),
            None => (None, false),
        };
        let parent_id = parent.map(|p| ids[p]);
        let id = if even {
            tree.add_component_with(parent_id, "Node", &name, EvenOnly)
        } else {
            tree.add_component(parent_id, "Node", &name)
        }
        .unwrap();

        let x = tree.add_parameter(id, "x", Parameter::new(0i64)).unwrap();
        let y = tree.add_parameter(id, "y", Parameter::new(0i64)).unwrap();
        ids.push(id);
        parents.push(parent);
        strict.push(even);
        readers.push((x, y));
    }

    Fixture {
        tree,
        ids,
        parents,
        strict,
        readers,
    }
}

fn ancestors(parents: &[Option<usize>], mut node: usize) -> Vec<usize> {
    let mut chain = vec![node];
    while let Some(parent) = parents[node] {
        chain.push(parent);
        node = parent;
    }
    chain
}

fn full_name(fixture: &Fixture, node: usize, parameter: &str) -> String {
    let component = fixture.tree.component(fixture.ids[node]).unwrap();
    format!("{}.{}", component.full_name(), parameter)
}

// ============================================================================
// Dirty Propagation Property Tests
// ============================================================================

proptest! {
    /// CORE INVARIANT: staging marks the component and all its ancestors,
    /// and nothing else
    #[test]
    fn staging_marks_exactly_the_ancestor_chain(
        shape in shape(),
        target in any::<prop::sample::Index>(),
        value in any::<i64>(),
    ) {
        let mut fixture = build(&shape);
        let target = target.index(fixture.ids.len());
        let name = full_name(&fixture, target, "x");
        let address = fixture.tree.registry().lookup(&name).unwrap();

        fixture.tree.stage_json(address, &Value::from(value)).unwrap();

        let chain = ancestors(&fixture.parents, target);
        for (node, id) in fixture.ids.iter().enumerate() {
            prop_assert_eq!(fixture.tree.is_dirty(*id), chain.contains(&node));
        }
    }

    /// Every registered name resolves to a parameter of its own component
    #[test]
    fn registry_resolves_every_parameter(shape in shape()) {
        let fixture = build(&shape);
        prop_assert_eq!(fixture.tree.registry().len(), 2 * fixture.ids.len());
        for (node, id) in fixture.ids.iter().enumerate() {
            for (index, parameter) in ["x", "y"].iter().enumerate() {
                let address = fixture.tree.registry().lookup(&full_name(&fixture, node, parameter));
                prop_assert_eq!(address.map(|a| (a.component, a.index)), Some((*id, index)));
            }
        }
    }
}

// ============================================================================
// Commit Property Tests
// ============================================================================

proptest! {
    /// CORE INVARIANT: a component commits all of its staged parameters or
    /// none of them; rejected components stay dirty, and so do their ancestors
    #[test]
    fn commit_is_all_or_nothing_per_component(
        shape in shape(),
        updates in prop::collection::vec((any::<prop::sample::Index>(), any::<bool>(), -50i64..50), 0..24),
    ) {
        let mut fixture = build(&shape);
        let count = fixture.ids.len();
        let mut staged: Vec<(i64, i64)> = vec![(0, 0); count];
        let mut touched = vec![false; count];

        for (node, is_x, value) in updates {
            let node = node.index(count);
            let name = full_name(&fixture, node, if is_x { "x" } else { "y" });
            let address = fixture.tree.registry().lookup(&name).unwrap();
            fixture.tree.stage_json(address, &Value::from(value)).unwrap();
            if is_x {
                staged[node].0 = value;
            } else {
                staged[node].1 = value;
            }
            touched[node] = true;
        }

        let report = fixture.tree.validate_components();

        let mut still_dirty = vec![false; count];
        for node in 0..count {
            let (x, y) = &fixture.readers[node];
            let rejected = touched[node]
                && fixture.strict[node]
                && (staged[node].0 % 2 != 0 || staged[node].1 % 2 != 0);

            if rejected {
                prop_assert_eq!((x.read(), y.read()), (0, 0));
                prop_assert!(report.rejected.iter().any(|r| r.component == fixture.ids[node]));
                for ancestor in ancestors(&fixture.parents, node) {
                    still_dirty[ancestor] = true;
                }
            } else {
                prop_assert_eq!((x.read(), y.read()), staged[node]);
                prop_assert_eq!(report.committed.contains(&fixture.ids[node]), touched[node]);
            }
        }

        for node in 0..count {
            prop_assert_eq!(fixture.tree.is_dirty(fixture.ids[node]), still_dirty[node]);
        }
    }
}
