//! Dependency graph construction and topological ordering for
//! guarantees.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::ast::{EnsureStmt, Program, ResourceRef, Statement};
use crate::conditions;
use crate::error::{Diagnostic, Stage};

/// How much an invariant block raises its guarantees' priority.
const INVARIANT_PRIORITY: i64 = 1000;

// ──────────────────────────────────────────────
// Nodes and edges
// ──────────────────────────────────────────────

/// A single guarantee node.
#[derive(Debug, Clone)]
pub struct Guarantee {
    /// Canonical `condition:subject@position`.
    pub id: String,
    pub stmt: EnsureStmt,
    pub priority: i64,
    pub is_invariant: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    Requires,
    After,
    Before,
    Implies,
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EdgeKind::Requires => "requires",
            EdgeKind::After => "after",
            EdgeKind::Before => "before",
            EdgeKind::Implies => "implies",
        })
    }
}

/// `from` must be satisfied before `to`.
#[derive(Debug, Clone)]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub kind: EdgeKind,
}

// ──────────────────────────────────────────────
// Graph
// ──────────────────────────────────────────────

#[derive(Default, Debug)]
pub struct Graph {
    pub nodes: BTreeMap<String, Guarantee>,
    pub edges: Vec<Edge>,
    pub invariants: BTreeSet<String>,
    diagnostics: Vec<Diagnostic>,
}

/// Build the dependency graph from the expanded program.
pub fn build(program: &Program) -> Graph {
    let mut graph = Graph::default();
    graph.collect_nodes(&program.statements, false, 0);
    graph.build_edges();
    graph
}

impl Graph {
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    fn collect_nodes(&mut self, statements: &[Statement], is_invariant: bool, priority: i64) {
        for stmt in statements {
            match stmt {
                Statement::Ensure(ensure) => self.add_guarantee(ensure, is_invariant, priority),
                Statement::On(block) => self.collect_nodes(&block.body, is_invariant, priority),
                Statement::Invariant(block) => {
                    self.collect_nodes(&block.body, true, priority + INVARIANT_PRIORITY)
                }
                Statement::Parallel(block) => {
                    // Lowered to sequential execution.
                    self.collect_nodes(&block.body, is_invariant, priority)
                }
                Statement::ForEach(block) => {
                    self.collect_nodes(&block.body, is_invariant, priority)
                }
                _ => {}
            }
        }
    }

    fn add_guarantee(&mut self, stmt: &EnsureStmt, is_invariant: bool, priority: i64) {
        let id = guarantee_id(stmt);
        if is_invariant {
            self.invariants.insert(id.clone());
        }
        self.nodes.insert(
            id.clone(),
            Guarantee {
                id,
                stmt: stmt.clone(),
                priority,
                is_invariant,
            },
        );
    }

    /// Edge discovery runs once all nodes are collected, so results do
    /// not depend on statement ordering.
    fn build_edges(&mut self) {
        let mut edges = Vec::new();

        // Group node ids by subject, and condition -> id within each.
        let mut by_subject: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
        for (id, node) in &self.nodes {
            by_subject
                .entry(node.stmt.subject_key())
                .or_default()
                .insert(node.stmt.condition.clone(), id.clone());
        }

        for (id, node) in &self.nodes {
            let subject_key = node.stmt.subject_key();
            let siblings = &by_subject[&subject_key];

            // Implication edges, from the same table the expander uses.
            if let Some(meta) = conditions::lookup(&node.stmt.condition) {
                for implied in meta.implies {
                    if let Some(implied_id) = siblings.get(*implied) {
                        edges.push(Edge {
                            from: implied_id.clone(),
                            to: id.clone(),
                            kind: EdgeKind::Implies,
                        });
                    }
                }
            }

            // Explicit requires edges.
            for required in &node.stmt.requires {
                match siblings.get(required) {
                    Some(required_id) => edges.push(Edge {
                        from: required_id.clone(),
                        to: id.clone(),
                        kind: EdgeKind::Requires,
                    }),
                    None => self.diagnostics.push(Diagnostic::graph(
                        &node.stmt.pos,
                        format!(
                            "unresolved dependency: no guarantee '{}' on {}",
                            required,
                            display_subject(&node.stmt)
                        ),
                    )),
                }
            }

            // Ordering edges against every guarantee on the referenced
            // resource.
            for after in &node.stmt.after {
                for other_id in subject_ids(&by_subject, after) {
                    if other_id != *id {
                        edges.push(Edge {
                            from: other_id,
                            to: id.clone(),
                            kind: EdgeKind::After,
                        });
                    }
                }
            }
            for before in &node.stmt.before {
                for other_id in subject_ids(&by_subject, before) {
                    if other_id != *id {
                        edges.push(Edge {
                            from: id.clone(),
                            to: other_id,
                            kind: EdgeKind::Before,
                        });
                    }
                }
            }
        }

        self.edges = edges;
    }

    // -- Topological ordering -----------------------------------

    /// Kahn's algorithm; ties broken by (priority descending, id
    /// ascending). Errors with the reconstructed path on a cycle.
    pub fn topo_sort(&self) -> Result<Vec<&Guarantee>, Diagnostic> {
        let mut adjacency: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        let mut indegree: BTreeMap<&str, usize> = BTreeMap::new();
        for id in self.nodes.keys() {
            adjacency.entry(id).or_default();
            indegree.insert(id, 0);
        }
        for edge in &self.edges {
            adjacency
                .entry(edge.from.as_str())
                .or_default()
                .push(edge.to.as_str());
            *indegree.entry(edge.to.as_str()).or_insert(0) += 1;
        }

        let sort_frontier = |frontier: &mut Vec<&Guarantee>| {
            frontier.sort_by(|a, b| {
                b.priority
                    .cmp(&a.priority)
                    .then_with(|| a.id.cmp(&b.id))
            });
        };

        let mut frontier: Vec<&Guarantee> = indegree
            .iter()
            .filter(|&(_, &degree)| degree == 0)
            .map(|(id, _)| &self.nodes[*id])
            .collect();
        sort_frontier(&mut frontier);

        let mut ordered = Vec::with_capacity(self.nodes.len());
        while !frontier.is_empty() {
            let node = frontier.remove(0);
            ordered.push(node);

            let mut inserted = false;
            for successor in &adjacency[node.id.as_str()] {
                let degree = indegree.get_mut(successor).expect("known node");
                *degree -= 1;
                if *degree == 0 {
                    frontier.push(&self.nodes[*successor]);
                    inserted = true;
                }
            }
            if inserted {
                sort_frontier(&mut frontier);
            }
        }

        if ordered.len() != self.nodes.len() {
            let message = match self.find_cycle() {
                Some(cycle) => {
                    format!("cyclic dependency detected: {}", cycle.join(" -> "))
                }
                None => "cyclic dependency detected".to_owned(),
            };
            let pos = ordered
                .first()
                .map(|g| g.stmt.pos.clone())
                .unwrap_or_else(|| {
                    self.nodes
                        .values()
                        .next()
                        .map(|g| g.stmt.pos.clone())
                        .unwrap_or_default()
                });
            return Err(Diagnostic::new(Stage::Plan, &pos, message));
        }

        Ok(ordered)
    }

    /// DFS with a recursion stack; reconstructs one offending cycle.
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let mut adjacency: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for edge in &self.edges {
            adjacency
                .entry(edge.from.as_str())
                .or_default()
                .push(edge.to.as_str());
        }

        let mut visited: BTreeSet<&str> = BTreeSet::new();
        let mut stack: BTreeSet<&str> = BTreeSet::new();
        let mut parent: BTreeMap<&str, &str> = BTreeMap::new();

        fn visit<'a>(
            node: &'a str,
            adjacency: &BTreeMap<&'a str, Vec<&'a str>>,
            visited: &mut BTreeSet<&'a str>,
            stack: &mut BTreeSet<&'a str>,
            parent: &mut BTreeMap<&'a str, &'a str>,
        ) -> Option<(&'a str, &'a str)> {
            visited.insert(node);
            stack.insert(node);
            if let Some(successors) = adjacency.get(node) {
                for &successor in successors {
                    if !visited.contains(successor) {
                        parent.insert(successor, node);
                        if let Some(found) =
                            visit(successor, adjacency, visited, stack, parent)
                        {
                            return Some(found);
                        }
                    } else if stack.contains(successor) {
                        return Some((successor, node));
                    }
                }
            }
            stack.remove(node);
            None
        }

        for id in self.nodes.keys() {
            if visited.contains(id.as_str()) {
                continue;
            }
            if let Some((start, end)) =
                visit(id.as_str(), &adjacency, &mut visited, &mut stack, &mut parent)
            {
                // Walk parents from `end` back to `start`.
                let mut cycle = vec![start.to_owned()];
                let mut segment = Vec::new();
                let mut cur = end;
                while cur != start {
                    segment.push(cur.to_owned());
                    cur = parent[cur];
                }
                segment.reverse();
                cycle.extend(segment);
                cycle.push(start.to_owned());
                return Some(cycle);
            }
        }
        None
    }

    // -- DOT output ---------------------------------------------

    /// DOT rendering of the graph for `compile --graph`.
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph guarantees {\n  rankdir=TB;\n");

        for (id, node) in &self.nodes {
            let mut label = node.stmt.condition.clone();
            if let Some(subject) = &node.stmt.subject {
                label.push_str("\\n");
                label.push_str(&subject.canonical());
            }
            let peripheries = if node.is_invariant { 2 } else { 1 };
            out.push_str(&format!(
                "  \"{}\" [label=\"{}\", shape=box, peripheries={}];\n",
                dot_escape(id),
                dot_escape(&label),
                peripheries
            ));
        }

        for edge in &self.edges {
            let style = if edge.kind == EdgeKind::Implies {
                "dashed"
            } else {
                "solid"
            };
            out.push_str(&format!(
                "  \"{}\" -> \"{}\" [style={}, label=\"{}\"];\n",
                dot_escape(&edge.from),
                dot_escape(&edge.to),
                style,
                edge.kind
            ));
        }

        out.push_str("}\n");
        out
    }
}

/// Canonical node id: `condition:subject@position`.
pub fn guarantee_id(stmt: &EnsureStmt) -> String {
    format!("{}:{}@{}", stmt.condition, stmt.subject_key(), stmt.pos)
}

fn subject_ids(
    by_subject: &BTreeMap<String, BTreeMap<String, String>>,
    subject: &ResourceRef,
) -> Vec<String> {
    by_subject
        .get(&subject.canonical())
        .map(|conditions| conditions.values().cloned().collect())
        .unwrap_or_default()
}

fn display_subject(stmt: &EnsureStmt) -> String {
    match &stmt.subject {
        Some(subject) => subject.canonical(),
        None => "<no subject>".to_owned(),
    }
}

fn dot_escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::Binder;
    use crate::imply::Expander;
    use crate::parser::parse_source;

    fn compile_graph(input: &str) -> Graph {
        let (program, diagnostics) = parse_source(input, "test.ens");
        assert!(diagnostics.is_empty(), "parse: {:?}", diagnostics);
        let mut binder = Binder::new();
        let program = binder.bind(program);
        let program = binder.expand_policies(program);
        assert!(binder.diagnostics().is_empty(), "bind: {:?}", binder.diagnostics());
        let mut expander = Expander::new();
        let program = expander.expand(program);
        assert!(expander.diagnostics().is_empty(), "imply: {:?}", expander.diagnostics());
        build(&program)
    }

    fn ordered_conditions(graph: &Graph) -> Vec<String> {
        graph
            .topo_sort()
            .expect("acyclic")
            .iter()
            .map(|g| g.stmt.condition.clone())
            .collect()
    }

    #[test]
    fn implication_edges_order_the_chain() {
        let graph =
            compile_graph("on file \"s.db\" {\n  ensure encrypted with AES:256 key \"env:K\"\n}");

        assert_eq!(graph.nodes.len(), 4);
        assert!(graph
            .edges
            .iter()
            .any(|e| e.kind == EdgeKind::Implies));
        assert_eq!(
            ordered_conditions(&graph),
            vec!["exists", "readable", "writable", "encrypted"]
        );
    }

    #[test]
    fn requires_edge_connects_existing_nodes() {
        let graph = compile_graph(
            "ensure exists on file \"s.db\"\nensure backed_up on file \"s.db\" requires exists",
        );
        assert!(graph.diagnostics().is_empty(), "{:?}", graph.diagnostics());
        assert!(graph
            .edges
            .iter()
            .any(|e| e.kind == EdgeKind::Requires));
    }

    #[test]
    fn unresolved_requires_is_a_graph_error() {
        let graph = compile_graph("ensure exists on file \"s.db\" requires verified");
        assert_eq!(graph.diagnostics().len(), 1);
        assert!(graph.diagnostics()[0]
            .message
            .contains("unresolved dependency: no guarantee 'verified'"));
    }

    #[test]
    fn after_and_before_edges() {
        let graph = compile_graph(
            "ensure exists on file \"a\"\nensure exists on file \"b\" after file \"a\"\nensure exists on file \"c\" before file \"a\"",
        );
        assert!(graph.edges.iter().any(|e| e.kind == EdgeKind::After));
        assert!(graph.edges.iter().any(|e| e.kind == EdgeKind::Before));

        let order = graph
            .topo_sort()
            .unwrap()
            .iter()
            .map(|g| g.stmt.subject_key())
            .collect::<Vec<_>>();
        let pos_a = order.iter().position(|s| s.contains("\"a\"")).unwrap();
        let pos_b = order.iter().position(|s| s.contains("\"b\"")).unwrap();
        let pos_c = order.iter().position(|s| s.contains("\"c\"")).unwrap();
        assert!(pos_a < pos_b);
        assert!(pos_c < pos_a);
    }

    #[test]
    fn invariants_win_priority_ties() {
        let graph = compile_graph(
            "ensure exists on file \"zz.txt\"\ninvariant {\n  ensure exists on file \"aa.txt\"\n}",
        );

        let ordered = graph.topo_sort().unwrap();
        assert!(ordered[0].is_invariant);
        assert_eq!(ordered[0].priority, 1000);
        assert!(graph.invariants.contains(&ordered[0].id));
    }

    #[test]
    fn requires_cycle_is_reported_with_both_ids() {
        let graph = compile_graph(
            "ensure replicated on database \"db\" requires verified\nensure verified on database \"db\" requires replicated",
        );

        let err = graph.topo_sort().unwrap_err();
        assert!(err.message.contains("cyclic dependency detected"));
        assert!(err.message.contains("replicated"));
        assert!(err.message.contains("verified"));

        let cycle = graph.find_cycle().unwrap();
        assert!(cycle.len() >= 3);
        assert_eq!(cycle.first(), cycle.last());
    }

    #[test]
    fn dot_output_lists_nodes_and_edges() {
        let graph =
            compile_graph("on file \"s.db\" {\n  ensure encrypted with AES:256 key \"env:K\"\n}");
        let dot = graph.to_dot();
        assert!(dot.starts_with("digraph guarantees {"));
        assert!(dot.contains("encrypted"));
        assert!(dot.contains("style=dashed"));
    }
}
