use crate::index::Index;
use std::collections::{BTreeMap, HashMap};

/// Visited node -> its direct outgoing call targets.
pub type TraceGraph = BTreeMap<String, Vec<String>>;

/// Depth-first walk over resolved call edges from `start`, at most
/// `max_depth` edges deep. An unknown start yields an empty graph; a known
/// start is always present. Unresolved targets appear as leaves.
pub fn trace(index: &Index, start: &str, max_depth: i64) -> TraceGraph {
    let mut graph = TraceGraph::new();
    if index.symbol(start).is_none() {
        return graph;
    }
    // Largest remaining budget a node has been expanded with.
    let mut expanded: HashMap<&str, i64> = HashMap::new();
    let mut stack: Vec<(&str, i64)> = vec![(start, max_depth.max(0))];
    expanded.insert(start, max_depth.max(0));
    while let Some((node, remaining)) = stack.pop() {
        let targets = index.outgoing(node);
        graph
            .entry(node.to_string())
            .or_insert_with(|| targets.to_vec());
        if remaining == 0 {
            continue;
        }
        for target in targets.iter().rev() {
            let budget = remaining - 1;
            let seen = expanded.get(target.as_str()).copied();
            if seen.is_some_and(|previous| previous >= budget) {
                continue;
            }
            expanded.insert(target.as_str(), budget);
            stack.push((target.as_str(), budget));
        }
    }
    graph
}
