use std::collections::VecDeque;

use super::hierarchy::{self, HierarchyNode};
use super::transport::{
    hierarchy_url, normalize_path, Request, RequestToken, ResponseBody, ResponseKind, Transport,
    TransportResult,
};

/// One line of the rendered tree view handed to the renderer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEntry {
    /// Absolute item path of the node
    pub path: String,
    /// Depth below the (implicit) root, direct children being 1
    pub depth: usize,
    pub kind: Option<String>,
    /// Collapsed entry whose children are revealed on demand
    pub placeholder: bool,
}

/// What a hierarchy response did to the tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeOutcome {
    /// Main load: the whole tree was replaced and the index rebuilt
    Rebuilt,
    /// Sub load: the subtree at the given path was replaced and grafted
    Grafted(String),
    /// Sub load whose target vanished from the tree; dropped silently
    StaleTarget(String),
    /// Transport failure or rejected document; the tree state is unchanged
    NotReady,
}

struct PendingLoad {
    token: RequestToken,
    /// None for the main load, the target path for a sub load
    target: Option<String>,
}

/// The distinguished item owning the (possibly partial) server namespace.
///
/// The main load replaces the whole tree and rebuilds the rendered index from
/// scratch, bounded by the expansion ceiling. Sub loads replace exactly one
/// node in place and graft only the newly revealed entries into the index,
/// leaving sibling subtrees untouched.
pub struct HierarchyTree {
    compact: u32,
    ceiling: usize,
    pub ready: bool,
    pub version: i64,
    root: Option<HierarchyNode>,
    index: Vec<RenderedEntry>,
    pending: Option<PendingLoad>,
    wanted: VecDeque<String>,
}

impl HierarchyTree {
    pub fn new(compact: u32, ceiling: usize) -> Self {
        Self {
            compact,
            ceiling: ceiling.max(1),
            ready: false,
            version: 0,
            root: None,
            index: Vec::new(),
            pending: None,
            wanted: VecDeque::new(),
        }
    }

    /// The authoritative document, for path lookups. `"/"` is the root itself
    pub fn find(&self, path: &str) -> Option<&HierarchyNode> {
        hierarchy::find_node(self.root.as_ref()?, path)
    }

    /// Current rendered index
    pub fn index(&self) -> &[RenderedEntry] {
        &self.index
    }

    /// Force a full re-fetch on the next regular check. Lookups keep answering
    /// from the current document until the replacement arrives
    pub fn invalidate(&mut self) {
        self.ready = false;
    }

    /// Drop the document and abort any outstanding load
    pub fn clear(&mut self, transport: &mut dyn Transport) {
        if let Some(pending) = self.pending.take() {
            transport.cancel(pending.token);
        }
        self.ready = false;
        self.version = 0;
        self.root = None;
        self.index.clear();
        self.wanted.clear();
    }

    /// Issue the next needed load, if any. A second call while a request is
    /// outstanding is a no-op
    pub fn regular_check(&mut self, transport: &mut dyn Transport) -> Option<RequestToken> {
        if self.pending.is_some() {
            return None;
        }
        let target = if !self.ready {
            None
        } else {
            Some(self.wanted.pop_front()?)
        };
        let request = Request {
            url: hierarchy_url(target.as_deref(), self.compact),
            kind: ResponseKind::Document,
        };
        let token = transport.submit(request);
        self.pending = Some(PendingLoad { token, target });
        Some(token)
    }

    /// React to a click on a collapsed entry. When the children are already in
    /// the document (the entry was cut by the depth bound alone) the graft
    /// happens locally; a `more`-truncated node queues a sub load instead
    pub fn expand(&mut self, path: &str) -> Option<TreeOutcome> {
        let path = normalize_path(path);
        let entry = self.index.iter().find(|e| e.path == path)?;
        if !entry.placeholder {
            return None;
        }
        let needs_fetch = match self.find(&path) {
            Some(node) => node.more || node.children.is_empty(),
            None => true,
        };
        if needs_fetch {
            if !self.wanted.contains(&path) {
                self.wanted.push_back(path);
            }
            None
        } else {
            Some(self.graft(&path))
        }
    }

    /// Handle a hierarchy response routed back by the manager. Responses whose
    /// token does not match the outstanding load are discarded
    pub fn on_response(&mut self, token: RequestToken, result: TransportResult) -> TreeOutcome {
        match &self.pending {
            Some(pending) if pending.token == token => (),
            _ => {
                log::debug!("Dropping hierarchy response for stale request {token:?}");
                return TreeOutcome::NotReady;
            }
        }
        let target = self.pending.take().and_then(|p| p.target);

        let doc = match result {
            Ok(ResponseBody::Document(doc)) => doc,
            Ok(ResponseBody::Binary(_)) => {
                log::warn!("Hierarchy load returned a binary body; ignoring");
                return TreeOutcome::NotReady;
            }
            Err(e) => {
                log::warn!("Hierarchy load failed: {e}");
                return TreeOutcome::NotReady;
            }
        };

        let (node, doc_version) = match hierarchy::parse_document(&doc) {
            Ok(parsed) => parsed,
            Err(e) => {
                log::warn!("Hierarchy document rejected: {e}");
                return TreeOutcome::NotReady;
            }
        };

        match target {
            None => self.replace_root(node, doc_version),
            Some(path) => self.replace_subtree(&path, node),
        }
    }

    fn replace_root(&mut self, node: HierarchyNode, doc_version: i64) -> TreeOutcome {
        if doc_version >= self.version {
            self.version = doc_version;
        } else {
            log::warn!(
                "Server reported hierarchy version {doc_version} below known {}; keeping counter",
                self.version
            );
        }
        self.root = Some(node);
        self.rebuild_index();
        self.ready = true;
        log::info!(
            "Hierarchy loaded, version {}, {} rendered entries",
            self.version,
            self.index.len()
        );
        TreeOutcome::Rebuilt
    }

    fn replace_subtree(&mut self, path: &str, mut node: HierarchyNode) -> TreeOutcome {
        // the version of a sub document is not tracked; the main load owns it
        let Some(root) = self.root.as_mut() else {
            return TreeOutcome::StaleTarget(String::from(path));
        };
        let Some(slot) = hierarchy::find_node_mut(root, path) else {
            log::debug!("Sub load target {path} vanished; dropping response");
            return TreeOutcome::StaleTarget(String::from(path));
        };
        // path identity survives, whatever the document called its root
        node.name = slot.name.clone();
        *slot = node;
        self.graft(path)
    }

    fn rebuild_index(&mut self) {
        self.index.clear();
        let Some(root) = &self.root else { return };
        let limit = hierarchy::eager_depth(&hierarchy::count_elements(root), self.ceiling);
        let mut index = Vec::new();
        push_entries(root, "", 1, limit, &mut index);
        self.index = index;
    }

    /// Recompute the index entries below `path` only, splicing them in after
    /// the entry itself. Sibling entries are not touched
    fn graft(&mut self, path: &str) -> TreeOutcome {
        let Some(node) = self.root.as_ref().and_then(|r| hierarchy::find_node(r, path)) else {
            return TreeOutcome::StaleTarget(String::from(path));
        };
        let Some(pos) = self.index.iter().position(|e| e.path == path) else {
            return TreeOutcome::StaleTarget(String::from(path));
        };

        let depth = self.index[pos].depth;
        let local = hierarchy::eager_depth(&hierarchy::count_elements(node), self.ceiling);
        let mut fresh = Vec::new();
        push_entries(node, path, depth + 1, depth + local, &mut fresh);

        self.index[pos].kind = node.kind.clone();
        self.index[pos].placeholder = node.more && node.children.is_empty();

        // drop stale descendants of a previous graft before splicing
        let prefix = format!("{path}/");
        let mut tail: Vec<RenderedEntry> = self.index.split_off(pos + 1);
        tail.retain(|e| !e.path.starts_with(&prefix));
        self.index.extend(fresh);
        self.index.extend(tail);

        TreeOutcome::Grafted(String::from(path))
    }
}

fn push_entries(
    node: &HierarchyNode,
    base: &str,
    depth: usize,
    limit: usize,
    out: &mut Vec<RenderedEntry>,
) {
    for child in &node.children {
        let path = format!("{base}/{}", child.name);
        let placeholder = child.more || (depth == limit && !child.children.is_empty());
        out.push(RenderedEntry {
            path: path.clone(),
            depth,
            kind: child.kind.clone(),
            placeholder,
        });
        if depth < limit {
            push_entries(child, &path, depth + 1, limit, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::fixtures::sample_doc;
    use crate::transport::mock::MockTransport;
    use serde_json::json;

    fn load_doc(
        tree: &mut HierarchyTree,
        transport: &mut MockTransport,
        doc: serde_json::Value,
    ) -> TreeOutcome {
        let token = tree
            .regular_check(transport)
            .expect("tree issued no request");
        tree.on_response(token, Ok(ResponseBody::Document(doc)))
    }

    fn loaded_tree(transport: &mut MockTransport, compact: u32, ceiling: usize) -> HierarchyTree {
        let mut tree = HierarchyTree::new(compact, ceiling);
        let outcome = load_doc(&mut tree, transport, sample_doc());
        assert_eq!(outcome, TreeOutcome::Rebuilt);
        tree
    }

    /// A wide tree: `branches` top folders, each truncated server-side
    fn wide_doc(branches: usize) -> serde_json::Value {
        let childs: Vec<_> = (0..branches)
            .map(|n| json!({ "_name": format!("app{n}"), "_more": true }))
            .collect();
        json!({ "_name": "top", "_version": 1, "_childs": childs })
    }

    fn branch_doc(children: usize) -> serde_json::Value {
        let childs: Vec<_> = (0..children)
            .map(|n| json!({ "_name": format!("item{n}"), "_kind": "rate" }))
            .collect();
        json!({ "_name": "app1", "_version": 1, "_childs": childs })
    }

    #[test]
    fn test_main_load_builds_index() {
        let mut transport = MockTransport::new();
        let tree = loaded_tree(&mut transport, 3, 200);
        assert!(tree.ready);
        assert_eq!(tree.version, 7);
        // all 9 nodes fit under the ceiling
        assert_eq!(tree.index().len(), 9);
        assert!(tree.find("/sys/app1/Rate").is_some());
        let app2 = tree
            .index()
            .iter()
            .find(|e| e.path == "/sys/app2")
            .unwrap();
        assert!(app2.placeholder);
    }

    #[test]
    fn test_at_most_one_request_in_flight() {
        let mut transport = MockTransport::new();
        let mut tree = HierarchyTree::new(3, 200);
        assert!(tree.regular_check(&mut transport).is_some());
        assert!(tree.regular_check(&mut transport).is_none());
        assert_eq!(transport.submitted.len(), 1);
    }

    #[test]
    fn test_transport_failure_leaves_tree_not_ready() {
        let mut transport = MockTransport::new();
        let mut tree = HierarchyTree::new(3, 200);
        let token = tree.regular_check(&mut transport).unwrap();
        let outcome = tree.on_response(token, Err(crate::error::TransportError::Disconnected));
        assert_eq!(outcome, TreeOutcome::NotReady);
        assert!(!tree.ready);
        // the next tick retries
        assert!(tree.regular_check(&mut transport).is_some());
    }

    #[test]
    fn test_depth_bound_creates_placeholders() {
        let mut transport = MockTransport::new();
        let mut tree = HierarchyTree::new(3, 6);
        let outcome = load_doc(&mut tree, &mut transport, sample_doc());
        assert_eq!(outcome, TreeOutcome::Rebuilt);
        // ceiling 6 cuts at depth 2: 2 + 4 entries, the leaf level stays hidden
        assert_eq!(tree.index().len(), 6);
        let app1 = tree
            .index()
            .iter()
            .find(|e| e.path == "/sys/app1")
            .unwrap();
        assert!(app1.placeholder);
    }

    #[test]
    fn test_local_expansion_needs_no_fetch() {
        let mut transport = MockTransport::new();
        let mut tree = HierarchyTree::new(3, 6);
        load_doc(&mut tree, &mut transport, sample_doc());
        let submitted_before = transport.submitted.len();

        let outcome = tree.expand("/sys/app1");
        assert_eq!(
            outcome,
            Some(TreeOutcome::Grafted(String::from("/sys/app1")))
        );
        assert_eq!(transport.submitted.len(), submitted_before);
        assert!(tree.index().iter().any(|e| e.path == "/sys/app1/Rate"));
        // the truncated sibling stays collapsed
        let app2 = tree
            .index()
            .iter()
            .find(|e| e.path == "/sys/app2")
            .unwrap();
        assert!(app2.placeholder);
    }

    #[test]
    fn test_truncated_tree_then_expansion() {
        let mut transport = MockTransport::new();
        let mut tree = HierarchyTree::new(3, 200);
        load_doc(&mut tree, &mut transport, wide_doc(500));

        // exactly one placeholder per truncated branch
        let placeholders = tree.index().iter().filter(|e| e.placeholder).count();
        assert_eq!(placeholders, 500);

        // expanding /app1 must fetch, the children are not in the document
        assert_eq!(tree.expand("/app1"), None);
        let token = tree.regular_check(&mut transport).unwrap();
        let request = transport.last().1.clone();
        assert_eq!(request.url, "/app1/h.json?compact=3");

        let before: Vec<_> = tree
            .index()
            .iter()
            .filter(|e| !e.path.starts_with("/app1"))
            .cloned()
            .collect();
        let outcome = tree.on_response(token, Ok(ResponseBody::Document(branch_doc(20))));
        assert_eq!(outcome, TreeOutcome::Grafted(String::from("/app1")));

        // only app1's children were grafted; every other entry is untouched
        assert!(tree.index().iter().any(|e| e.path == "/app1/item0"));
        assert_eq!(
            tree.index()
                .iter()
                .filter(|e| e.path.starts_with("/app1/"))
                .count(),
            20
        );
        let after: Vec<_> = tree
            .index()
            .iter()
            .filter(|e| !e.path.starts_with("/app1"))
            .cloned()
            .collect();
        assert_eq!(before, after);

        // the expanded entry is no longer a placeholder
        let app1 = tree
            .index()
            .iter()
            .find(|e| e.path == "/app1")
            .unwrap();
        assert!(!app1.placeholder);
    }

    #[test]
    fn test_stale_expansion_target_dropped() {
        let mut transport = MockTransport::new();
        let mut tree = HierarchyTree::new(3, 200);
        load_doc(&mut tree, &mut transport, wide_doc(3));

        tree.expand("/app1");
        let token = tree.regular_check(&mut transport).unwrap();

        // the branch disappears from the document while the request is out
        let replaced = json!({
            "_name": "top",
            "_version": 2,
            "_childs": [ { "_name": "other" } ]
        });
        tree.root = Some(crate::hierarchy::parse_document(&replaced).unwrap().0);
        tree.rebuild_index();

        let outcome = tree.on_response(token, Ok(ResponseBody::Document(branch_doc(4))));
        match outcome {
            TreeOutcome::StaleTarget(path) => assert_eq!(path, "/app1"),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(tree.index().iter().all(|e| !e.path.starts_with("/app1")));
    }

    #[test]
    fn test_unmatched_response_token_discarded() {
        let mut transport = MockTransport::new();
        let mut tree = loaded_tree(&mut transport, 3, 200);
        let outcome = tree.on_response(
            RequestToken(999),
            Ok(ResponseBody::Document(wide_doc(2))),
        );
        assert_eq!(outcome, TreeOutcome::NotReady);
        assert_eq!(tree.version, 7);
    }

    #[test]
    fn test_version_never_decreases() {
        let mut transport = MockTransport::new();
        let mut tree = loaded_tree(&mut transport, 3, 200);
        assert_eq!(tree.version, 7);

        tree.invalidate();
        let outcome = load_doc(
            &mut tree,
            &mut transport,
            json!({ "_name": "top", "_version": 3, "_childs": [] }),
        );
        assert_eq!(outcome, TreeOutcome::Rebuilt);
        assert_eq!(tree.version, 7);

        tree.clear(&mut transport);
        assert_eq!(tree.version, 0);
    }
}
