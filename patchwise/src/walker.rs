use std::collections::{BTreeMap, HashMap};

use tracing::{debug, instrument};

use crate::patch::ToPatch;
use crate::sbom::{DependencyRef, VersionNode, WorkspaceGraph};
use crate::vulnerability::Vulnerability;

/// Depth-first search of a workspace graph for nodes carrying a known
/// vulnerability.
///
/// Matching is string equality on `name@version`; the graph is walked as a
/// tree per direct dependency and a branch stops when it reaches a key that
/// is already on its own path.
pub struct GraphWalker<'a> {
    graph: &'a WorkspaceGraph,
    by_key: HashMap<String, Vec<&'a Vulnerability>>,
}

impl<'a> GraphWalker<'a> {
    pub fn new(graph: &'a WorkspaceGraph, vulnerabilities: &'a [Vulnerability]) -> Self {
        let mut by_key: HashMap<String, Vec<&'a Vulnerability>> = HashMap::new();
        for vuln in vulnerabilities {
            by_key.entry(vuln.affected_key()).or_default().push(vuln);
        }
        Self { graph, by_key }
    }

    /// Direct dependency key -> every vulnerable node reachable from it.
    /// Dependencies with nothing to patch are left out.
    #[instrument(skip_all, fields(roots = roots.len()))]
    pub fn collect(&self, roots: &[DependencyRef]) -> BTreeMap<String, Vec<ToPatch>> {
        let mut found = BTreeMap::new();
        for root in roots {
            let Some(node) = self.graph.node(&root.name, &root.version) else {
                debug!(dependency = %root.key(), "direct dependency missing from graph, skipping");
                continue;
            };
            let mut entries = Vec::new();
            self.descend(node, &[], &mut entries);
            if !entries.is_empty() {
                found.insert(root.key(), entries);
            }
        }
        found
    }

    fn descend(&self, node: &VersionNode, path: &[String], out: &mut Vec<ToPatch>) {
        if path.contains(&node.key) {
            return;
        }
        let mut branch = path.to_vec();
        branch.push(node.key.clone());

        if let Some(vulns) = self.by_key.get(&node.key) {
            out.extend(vulns.iter().map(|vuln| ToPatch {
                dependency_name: vuln.affected_dependency.clone(),
                dependency_version: vuln.affected_version.clone(),
                path: branch.clone(),
                vulnerability: (*vuln).clone(),
            }));
        }

        for (child_name, child_version) in &node.dependencies {
            match self.graph.node(child_name, child_version) {
                Some(child) => self.descend(child, &branch, out),
                None => debug!(
                    parent = %node.key,
                    child = %format!("{child_name}@{child_version}"),
                    "unresolved child node"
                ),
            }
        }
    }
}
