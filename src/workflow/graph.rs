//! State graph validation
//!
//! Builds a petgraph `DiGraph` over the states of a definition and walks it
//! from the start state. Validation is eager: a definition that passes here
//! can only fail at run time through its handlers, its choice branches, or
//! the engine's visit bound.

use crate::error::DefinitionError;
use crate::workflow::types::WorkflowDefinition;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Bfs;
use std::collections::{BTreeSet, HashMap};

/// Referrer name used when the start pointer itself is dangling
pub const START_REFERENCE: &str = "<start>";

/// Outcome of a successful validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphReport {
    /// States reachable from the start state, start included
    pub reachable: BTreeSet<String>,
    /// Defined states that are never reached
    pub unreachable: Vec<String>,
    /// Terminal states reachable from the start state
    pub terminals: Vec<String>,
}

/// Validate the definition's graph
///
/// Unknown references and missing terminals are always fatal. Unreachable
/// states are logged as warnings unless `strict` is set, in which case the
/// first one is returned as an error.
pub fn validate(definition: &WorkflowDefinition, strict: bool) -> Result<GraphReport, DefinitionError> {
    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let mut index: HashMap<&str, NodeIndex> = HashMap::new();

    for name in definition.states.keys() {
        index.insert(name.as_str(), graph.add_node(name.as_str()));
    }

    let start = *index
        .get(definition.start_state.as_str())
        .ok_or_else(|| DefinitionError::UnknownState {
            state: definition.start_state.clone(),
            referenced_by: START_REFERENCE.to_string(),
        })?;

    for (name, node) in &definition.states {
        let from = index[name.as_str()];
        for target in node.successors() {
            let to = index
                .get(target)
                .ok_or_else(|| DefinitionError::UnknownState {
                    state: target.to_string(),
                    referenced_by: name.clone(),
                })?;
            graph.add_edge(from, *to, ());
        }
    }

    let mut reachable = BTreeSet::new();
    let mut bfs = Bfs::new(&graph, start);
    while let Some(nx) = bfs.next(&graph) {
        reachable.insert(graph[nx].to_string());
    }

    let terminals: Vec<String> = reachable
        .iter()
        .filter(|name| definition.states[name.as_str()].is_terminal())
        .cloned()
        .collect();
    if terminals.is_empty() {
        return Err(DefinitionError::NoTerminalReachable {
            workflow: definition.id.clone(),
            start: definition.start_state.clone(),
        });
    }

    let unreachable: Vec<String> = definition
        .states
        .keys()
        .filter(|name| !reachable.contains(*name))
        .cloned()
        .collect();

    for state in &unreachable {
        if strict {
            return Err(DefinitionError::UnreachableState {
                workflow: definition.id.clone(),
                state: state.clone(),
            });
        }
        tracing::warn!(
            workflow = %definition.id,
            state = %state,
            "⚠️ State is never reached from the start state"
        );
    }

    Ok(GraphReport {
        reachable,
        unreachable,
        terminals,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::builder::WorkflowBuilder;
    use crate::workflow::result::{ErrorKind, Payload, TaskResult};
    use crate::workflow::types::{ChoiceState, Predicate, TaskContext};

    async fn noop(_ctx: TaskContext, _payload: Payload) -> TaskResult {
        Ok(Payload::new())
    }

    #[test]
    fn test_valid_linear_graph() {
        let definition = WorkflowBuilder::new("etl")
            .task("Extract", noop, "Transform")
            .task("Transform", noop, "Done")
            .succeed("Done")
            .build()
            .unwrap();

        let report = validate(&definition, true).unwrap();
        assert_eq!(report.reachable.len(), 3);
        assert_eq!(report.terminals, vec!["Done".to_string()]);
        assert!(report.unreachable.is_empty());
    }

    #[test]
    fn test_unknown_next_reference() {
        let definition = WorkflowBuilder::new("etl")
            .task("Extract", noop, "Load")
            .succeed("Done")
            .build()
            .unwrap();

        let err = validate(&definition, false).unwrap_err();
        assert_eq!(
            err,
            DefinitionError::UnknownState {
                state: "Load".to_string(),
                referenced_by: "Extract".to_string(),
            }
        );
    }

    #[test]
    fn test_unknown_start_state() {
        let definition = WorkflowBuilder::new("etl")
            .succeed("Done")
            .start_at("Begin")
            .build()
            .unwrap();

        let err = validate(&definition, false).unwrap_err();
        assert_eq!(err.code(), "UNKNOWN_STATE");
    }

    #[test]
    fn test_unknown_choice_default() {
        let choice = ChoiceState::new()
            .when(Predicate::from_fn(|_| true), "Done")
            .otherwise("Nowhere");
        let definition = WorkflowBuilder::new("route")
            .choice("Route", choice)
            .succeed("Done")
            .build()
            .unwrap();

        let err = validate(&definition, false).unwrap_err();
        assert!(matches!(err, DefinitionError::UnknownState { ref state, .. } if state == "Nowhere"));
    }

    #[test]
    fn test_no_terminal_reachable() {
        let definition = WorkflowBuilder::new("loop")
            .task("A", noop, "B")
            .task("B", noop, "A")
            .succeed("Orphan")
            .build()
            .unwrap();

        let err = validate(&definition, false).unwrap_err();
        assert_eq!(err.code(), "NO_TERMINAL_REACHABLE");
    }

    #[test]
    fn test_unreachable_state_warns_or_fails() {
        let definition = WorkflowBuilder::new("etl")
            .task("Extract", noop, "Done")
            .succeed("Done")
            .fail("Unused", ErrorKind::Internal)
            .build()
            .unwrap();

        let report = validate(&definition, false).unwrap();
        assert_eq!(report.unreachable, vec!["Unused".to_string()]);

        let err = validate(&definition, true).unwrap_err();
        assert_eq!(err.code(), "UNREACHABLE_STATE");
    }

    #[test]
    fn test_cycle_with_exit_is_valid() {
        let choice = ChoiceState::new()
            .when(Predicate::from_fn(|p| p.contains_key("done")), "Done")
            .otherwise("Poll");
        let definition = WorkflowBuilder::new("poller")
            .task("Poll", noop, "Check")
            .choice("Check", choice)
            .succeed("Done")
            .build()
            .unwrap();

        assert!(validate(&definition, true).is_ok());
    }
}
