use std::collections::{BTreeMap, BTreeSet};

/// Finds one cycle in a directed graph, returned as its edge list in walk
/// order, or `None` if the graph is acyclic.
///
/// DFS 3-color: white (unvisited), gray (on the current path), black (done).
/// A back edge to a gray node closes a cycle; the cycle is the path segment
/// from that node to the current one.
pub fn find_cycle(
    nodes: &BTreeSet<String>,
    successors: &BTreeMap<String, BTreeSet<String>>,
) -> Option<Vec<(String, String)>> {
    const WHITE: u8 = 0;
    const GRAY: u8 = 1;
    const BLACK: u8 = 2;

    let mut color: BTreeMap<&str, u8> = nodes.iter().map(|n| (n.as_str(), WHITE)).collect();

    fn visit<'a>(
        node: &'a str,
        successors: &'a BTreeMap<String, BTreeSet<String>>,
        color: &mut BTreeMap<&'a str, u8>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<(String, String)>> {
        color.insert(node, GRAY);
        path.push(node);

        if let Some(next) = successors.get(node) {
            for succ in next {
                match color.get(succ.as_str()).copied().unwrap_or(WHITE) {
                    GRAY => {
                        // Back edge: the cycle runs from `succ`'s position on
                        // the path through `node` and back to `succ`.
                        let start = path.iter().position(|&n| n == succ.as_str())?;
                        let mut cycle: Vec<(String, String)> = path[start..]
                            .windows(2)
                            .map(|w| (w[0].to_string(), w[1].to_string()))
                            .collect();
                        cycle.push((node.to_string(), succ.clone()));
                        return Some(cycle);
                    }
                    WHITE => {
                        if let Some(cycle) = visit(succ.as_str(), successors, color, path) {
                            return Some(cycle);
                        }
                    }
                    _ => {}
                }
            }
        }

        path.pop();
        color.insert(node, BLACK);
        None
    }

    let node_list: Vec<&str> = nodes.iter().map(String::as_str).collect();
    for node in node_list {
        if color.get(node).copied() == Some(WHITE) {
            let mut path = Vec::new();
            if let Some(cycle) = visit(node, successors, &mut color, &mut path) {
                return Some(cycle);
            }
        }
    }
    None
}
