use serde_json::Value;

use super::error::HierarchyError;

/// One node of the server-side item namespace.
///
/// Identity is path based: the node's absolute path is the `/`-joined chain of
/// names from the root, and re-fetching a subtree replaces the node at its path
/// wholesale rather than merging fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HierarchyNode {
    pub name: String,
    /// Type tag used for item dispatch, e.g. "rate", "log", "ROOT.TH1D"
    pub kind: Option<String>,
    /// Last published value for simple items
    pub value: Option<String>,
    /// Display hint, e.g. "png" for image views
    pub view: Option<String>,
    /// Relative reference to the node's master (schema) record
    pub master: Option<String>,
    /// History depth the server keeps for this item
    pub history: Option<u64>,
    /// Set when the server truncated the children; they must be fetched on demand
    pub more: bool,
    pub children: Vec<HierarchyNode>,
}

fn field_str(obj: &serde_json::Map<String, Value>, key: &str) -> Option<String> {
    match obj.get(key) {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    }
}

fn parse_node(value: &Value) -> Result<HierarchyNode, HierarchyError> {
    let obj = value.as_object().ok_or(HierarchyError::NotAnObject)?;
    let name = field_str(obj, "_name").ok_or(HierarchyError::MissingName)?;

    let mut children = Vec::new();
    if let Some(Value::Array(childs)) = obj.get("_childs") {
        for child in childs {
            children.push(parse_node(child)?);
        }
    }

    Ok(HierarchyNode {
        name,
        kind: field_str(obj, "_kind"),
        value: field_str(obj, "_value"),
        view: field_str(obj, "_view"),
        master: field_str(obj, "_master"),
        history: obj.get("_history").and_then(Value::as_u64),
        more: obj.get("_more").and_then(Value::as_bool).unwrap_or(false),
        children,
    })
}

/// Parse a hierarchy description document into its root node and the version
/// counter the server stamped on it
pub fn parse_document(doc: &Value) -> Result<(HierarchyNode, i64), HierarchyError> {
    let obj = doc.as_object().ok_or(HierarchyError::NotAnObject)?;
    let version = obj
        .get("_version")
        .and_then(Value::as_i64)
        .ok_or(HierarchyError::MissingVersion)?;
    Ok((parse_node(doc)?, version))
}

/// Resolve a `/`-delimited path by walking child names down from `root`.
/// `"/"` resolves to the root itself; any missing segment yields None
pub fn find_node<'a>(root: &'a HierarchyNode, path: &str) -> Option<&'a HierarchyNode> {
    let mut node = root;
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        node = node.children.iter().find(|c| c.name == segment)?;
    }
    Some(node)
}

/// Mutable variant of [find_node], used for in-place subtree replacement
pub fn find_node_mut<'a>(
    root: &'a mut HierarchyNode,
    path: &str,
) -> Option<&'a mut HierarchyNode> {
    let mut node = root;
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        node = node.children.iter_mut().find(|c| c.name == segment)?;
    }
    Some(node)
}

/// Count descendants per depth level, the root itself being level 0
pub fn count_elements(node: &HierarchyNode) -> Vec<usize> {
    let mut counts = Vec::new();
    count_level(node, 0, &mut counts);
    counts
}

fn count_level(node: &HierarchyNode, depth: usize, counts: &mut Vec<usize>) {
    if counts.len() <= depth {
        counts.resize(depth + 1, 0);
    }
    counts[depth] += 1;
    for child in &node.children {
        count_level(child, depth + 1, counts);
    }
}

/// Pick the eager expansion depth so that the number of rendered nodes
/// (everything below the root, down to the chosen depth) stays at or below
/// `ceiling`. The first level is always rendered, however wide it is
pub fn eager_depth(counts: &[usize], ceiling: usize) -> usize {
    let mut depth = 1;
    let mut total = counts.get(1).copied().unwrap_or(0);
    for (level, count) in counts.iter().enumerate().skip(2) {
        if total + count > ceiling {
            break;
        }
        total += count;
        depth = level;
    }
    depth
}

#[cfg(test)]
pub(crate) mod fixtures {
    use serde_json::{json, Value};

    /// A small hierarchy document in the shape the server sends
    pub fn sample_doc() -> Value {
        json!({
            "_name": "top",
            "_version": 7,
            "_childs": [
                {
                    "_name": "sys",
                    "_childs": [
                        {
                            "_name": "app1",
                            "_kind": "DABC.Application",
                            "_childs": [
                                { "_name": "Rate", "_kind": "rate", "_value": "12.5", "_history": 100 },
                                { "_name": "Log", "_kind": "log", "_value": "running" },
                                { "_name": "BeamProfile", "_kind": "FESA.2D" }
                            ]
                        },
                        { "_name": "app2", "_kind": "DABC.Application", "_more": true }
                    ]
                },
                {
                    "_name": "root",
                    "_childs": [
                        { "_name": "StreamerInfo", "_kind": "ROOT.TList" },
                        { "_name": "histo1", "_kind": "ROOT.TH1D", "_master": "../StreamerInfo" }
                    ]
                }
            ]
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> HierarchyNode {
        parse_document(&fixtures::sample_doc()).unwrap().0
    }

    #[test]
    fn test_parse_document() {
        let (root, version) = parse_document(&fixtures::sample_doc()).unwrap();
        assert_eq!(version, 7);
        assert_eq!(root.name, "top");
        assert_eq!(root.children.len(), 2);
        let rate = find_node(&root, "/sys/app1/Rate").unwrap();
        assert_eq!(rate.kind.as_deref(), Some("rate"));
        assert_eq!(rate.value.as_deref(), Some("12.5"));
        assert_eq!(rate.history, Some(100));
        assert!(find_node(&root, "/sys/app2").unwrap().more);
    }

    #[test]
    fn test_missing_version_rejected() {
        let doc = serde_json::json!({ "_name": "top" });
        match parse_document(&doc) {
            Err(HierarchyError::MissingVersion) => (),
            _ => panic!(),
        }
    }

    #[test]
    fn test_find_node_round_trip() {
        let root = sample();
        // every node's own computed path resolves back to that node
        fn walk(root: &HierarchyNode, node: &HierarchyNode, path: String) {
            let found = find_node(root, &path).unwrap();
            assert_eq!(found.name, node.name);
            assert_eq!(found as *const _, node as *const _);
            for child in &node.children {
                walk(root, child, format!("{}/{}", path, child.name));
            }
        }
        for child in &root.children {
            walk(&root, child, format!("/{}", child.name));
        }
        assert!(find_node(&root, "/").is_some());
    }

    #[test]
    fn test_find_node_missing_segment() {
        let root = sample();
        assert!(find_node(&root, "/sys/nosuch/Rate").is_none());
        assert!(find_node(&root, "/sys/app1/Rate/deeper").is_none());
    }

    #[test]
    fn test_count_elements() {
        let root = sample();
        let counts = count_elements(&root);
        assert_eq!(counts, vec![1, 2, 4, 3]);
    }

    #[test]
    fn test_eager_depth_bounds_rendered_nodes() {
        // levels below the root: 2, 4, 3 nodes
        let counts = vec![1, 2, 4, 3];
        assert_eq!(eager_depth(&counts, 200), 3);
        assert_eq!(eager_depth(&counts, 6), 2);
        assert_eq!(eager_depth(&counts, 5), 1);
        // first level always shown, even over the ceiling
        assert_eq!(eager_depth(&counts, 1), 1);
    }
}
