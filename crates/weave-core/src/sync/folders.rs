//! Push order for folder records
//!
//! A folder record embeds the ordered guids of its children, so a folder
//! must go out after every child folder that is itself waiting to be pushed.
//! The pending folders form a graph: an arena of nodes, each counting its
//! children that are still pending. Nodes whose count reaches zero are
//! emitted in discovery order and release their own parents (Kahn's
//! algorithm). Whatever is left afterwards sits on a cycle; those nodes are
//! emitted last, in discovery order, so planning always terminates.

use std::collections::{BTreeSet, HashMap};

use tracing::warn;

use crate::error::SyncResult;

/// A folder scheduled for push, with the children read while planning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedFolder {
    /// Folder guid
    pub guid: String,
    /// Child guids in position order
    pub children: Vec<String>,
}

/// Folders in push order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FolderPlan {
    /// Folders to push, in order
    pub folders: Vec<PlannedFolder>,
    /// How many of them were on a cycle
    pub cyclic: usize,
}

struct Node {
    guid: String,
    children: Vec<String>,
    pending_children: usize,
    parents: Vec<usize>,
}

/// Order `pending` folder guids so children go before their parents.
///
/// `children_of` returns the ordered child guids of a folder. Duplicate
/// guids in `pending` are planned once.
pub fn plan<F>(pending: &[String], mut children_of: F) -> SyncResult<FolderPlan>
where
    F: FnMut(&str) -> SyncResult<Vec<String>>,
{
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut nodes: Vec<Node> = Vec::new();
    for guid in pending {
        if index.contains_key(guid.as_str()) {
            continue;
        }
        index.insert(guid, nodes.len());
        nodes.push(Node {
            guid: guid.clone(),
            children: children_of(guid)?,
            pending_children: 0,
            parents: Vec::new(),
        });
    }

    for parent in 0..nodes.len() {
        let mut seen = BTreeSet::new();
        let pending_children: Vec<usize> = nodes[parent]
            .children
            .iter()
            .filter_map(|c| index.get(c.as_str()).copied())
            .filter(|&child| seen.insert(child))
            .collect();
        nodes[parent].pending_children = pending_children.len();
        for child in pending_children {
            nodes[child].parents.push(parent);
        }
    }

    let mut ready: BTreeSet<usize> = (0..nodes.len())
        .filter(|&i| nodes[i].pending_children == 0)
        .collect();
    let mut emitted = vec![false; nodes.len()];
    let mut order = Vec::with_capacity(nodes.len());

    while let Some(next) = ready.pop_first() {
        emitted[next] = true;
        order.push(next);
        for p in nodes[next].parents.clone() {
            nodes[p].pending_children -= 1;
            if nodes[p].pending_children == 0 {
                ready.insert(p);
            }
        }
    }

    let stuck: Vec<usize> = (0..nodes.len()).filter(|&i| !emitted[i]).collect();
    if !stuck.is_empty() {
        let guids: Vec<&str> = stuck.iter().map(|&i| nodes[i].guid.as_str()).collect();
        warn!(folders = ?guids, "Bookmark folders form a cycle, pushing them last");
    }
    let cyclic = stuck.len();
    order.extend(stuck);

    let mut slots: Vec<Option<Node>> = nodes.into_iter().map(Some).collect();
    let folders = order
        .into_iter()
        .filter_map(|i| slots[i].take())
        .map(|node| PlannedFolder {
            guid: node.guid,
            children: node.children,
        })
        .collect();

    Ok(FolderPlan { folders, cyclic })
}
