//! Call-to-action tree stored as a flat arena.
//!
//! Nodes live in a `Vec` and reference their children by id; a side index maps
//! ids to arena slots. Loading never fails: malformed records are excluded and
//! reported through [`CtaTree::issues`] so tenant misconfiguration degrades to
//! "no CTA" instead of an engine error.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CtaNodeId(pub String);

impl CtaNodeId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CtaNodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CtaAction {
    ShowChildren,
    Redirect,
    Send,
}

impl CtaAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ShowChildren => "show_children",
            Self::Redirect => "redirect",
            Self::Send => "send",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "show_children" => Some(Self::ShowChildren),
            "redirect" => Some(Self::Redirect),
            "send" => Some(Self::Send),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CtaPayload {
    Children(Vec<CtaNodeId>),
    Url(String),
    Message(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CtaNode {
    pub id: CtaNodeId,
    pub label: String,
    pub payload: CtaPayload,
}

impl CtaNode {
    pub fn show_children(id: &str, label: &str, children: &[&str]) -> Self {
        Self {
            id: CtaNodeId(id.to_string()),
            label: label.to_string(),
            payload: CtaPayload::Children(
                children.iter().map(|child| CtaNodeId((*child).to_string())).collect(),
            ),
        }
    }

    pub fn redirect(id: &str, label: &str, url: &str) -> Self {
        Self {
            id: CtaNodeId(id.to_string()),
            label: label.to_string(),
            payload: CtaPayload::Url(url.to_string()),
        }
    }

    pub fn send(id: &str, label: &str, message: &str) -> Self {
        Self {
            id: CtaNodeId(id.to_string()),
            label: label.to_string(),
            payload: CtaPayload::Message(message.to_string()),
        }
    }

    pub fn action(&self) -> CtaAction {
        match self.payload {
            CtaPayload::Children(_) => CtaAction::ShowChildren,
            CtaPayload::Url(_) => CtaAction::Redirect,
            CtaPayload::Message(_) => CtaAction::Send,
        }
    }

    pub fn children(&self) -> &[CtaNodeId] {
        match &self.payload {
            CtaPayload::Children(children) => children,
            CtaPayload::Url(_) | CtaPayload::Message(_) => &[],
        }
    }

    pub fn summary(&self) -> CtaSummary {
        let (url, message) = match &self.payload {
            CtaPayload::Children(_) => (None, None),
            CtaPayload::Url(url) => (Some(url.clone()), None),
            CtaPayload::Message(message) => (None, Some(message.clone())),
        };
        CtaSummary {
            id: self.id.clone(),
            label: self.label.clone(),
            action: self.action(),
            url,
            message,
        }
    }
}

/// One-level view of a node as shipped to clients: never carries grandchildren.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CtaSummary {
    pub id: CtaNodeId,
    pub label: String,
    pub action: CtaAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Record shape used by tenant configuration and the admin collaborator.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCtaNode {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl From<&CtaNode> for RawCtaNode {
    fn from(node: &CtaNode) -> Self {
        let mut raw = RawCtaNode {
            id: node.id.0.clone(),
            label: node.label.clone(),
            action: node.action().as_str().to_string(),
            ..RawCtaNode::default()
        };
        match &node.payload {
            CtaPayload::Children(children) => {
                raw.children = Some(children.iter().map(|child| child.0.clone()).collect());
            }
            CtaPayload::Url(url) => raw.url = Some(url.clone()),
            CtaPayload::Message(message) => raw.message = Some(message.clone()),
        }
        raw
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CtaTreeIssue {
    MissingId { position: usize },
    DuplicateId { id: String },
    UnknownAction { id: String, action: String },
    MissingPayload { id: String, action: CtaAction },
    DanglingChild { parent: String, child: String },
    Cycle { id: String },
}

impl std::fmt::Display for CtaTreeIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingId { position } => write!(f, "node at position {position} has no id"),
            Self::DuplicateId { id } => write!(f, "node id `{id}` is defined more than once"),
            Self::UnknownAction { id, action } => {
                write!(f, "node `{id}` has unsupported action `{action}`")
            }
            Self::MissingPayload { id, action } => {
                let field = match action {
                    CtaAction::ShowChildren => "children",
                    CtaAction::Redirect => "url",
                    CtaAction::Send => "message",
                };
                write!(f, "node `{id}` with action `{}` is missing `{field}`", action.as_str())
            }
            Self::DanglingChild { parent, child } => {
                write!(f, "node `{parent}` references unknown child `{child}`")
            }
            Self::Cycle { id } => write!(f, "node `{id}` is part of a cycle"),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "CtaTreeWire", into = "CtaTreeWire")]
pub struct CtaTree {
    nodes: Vec<CtaNode>,
    index: HashMap<CtaNodeId, usize>,
    issues: Vec<CtaTreeIssue>,
}

impl CtaTree {
    pub fn from_nodes(nodes: Vec<CtaNode>) -> Self {
        Self::from_raw(nodes.iter().map(RawCtaNode::from).collect())
    }

    pub fn from_raw(records: Vec<RawCtaNode>) -> Self {
        let mut tree = CtaTree::default();

        for (position, record) in records.into_iter().enumerate() {
            let id = record.id.trim().to_string();
            if id.is_empty() {
                tree.issues.push(CtaTreeIssue::MissingId { position });
                continue;
            }
            if tree.index.contains_key(&CtaNodeId(id.clone())) {
                tree.issues.push(CtaTreeIssue::DuplicateId { id });
                continue;
            }
            let Some(action) = CtaAction::parse(&record.action) else {
                tree.issues.push(CtaTreeIssue::UnknownAction { id, action: record.action });
                continue;
            };

            let payload = match action {
                CtaAction::ShowChildren => record.children.map(|children| {
                    CtaPayload::Children(
                        children
                            .into_iter()
                            .map(|child| CtaNodeId(child.trim().to_string()))
                            .collect(),
                    )
                }),
                CtaAction::Redirect => non_blank(record.url).map(CtaPayload::Url),
                CtaAction::Send => non_blank(record.message).map(CtaPayload::Message),
            };
            let Some(payload) = payload else {
                tree.issues.push(CtaTreeIssue::MissingPayload { id, action });
                continue;
            };

            let label = if record.label.trim().is_empty() { id.clone() } else { record.label };
            let node = CtaNode { id: CtaNodeId(id), label, payload };
            tree.index.insert(node.id.clone(), tree.nodes.len());
            tree.nodes.push(node);
        }

        tree.collect_reference_issues();
        tree
    }

    pub fn get(&self, id: &CtaNodeId) -> Option<&CtaNode> {
        self.index.get(id).and_then(|slot| self.nodes.get(*slot))
    }

    pub fn contains(&self, id: &CtaNodeId) -> bool {
        self.index.contains_key(id)
    }

    pub fn nodes(&self) -> &[CtaNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn issues(&self) -> &[CtaTreeIssue] {
        &self.issues
    }

    fn collect_reference_issues(&mut self) {
        let mut issues = Vec::new();
        for node in &self.nodes {
            for child in node.children() {
                if !self.index.contains_key(child) {
                    issues.push(CtaTreeIssue::DanglingChild {
                        parent: node.id.0.clone(),
                        child: child.0.clone(),
                    });
                }
            }
        }

        // Iterative DFS with white/grey/black marking over arena slots.
        let mut state = vec![0_u8; self.nodes.len()];
        let mut reported = HashSet::new();
        for start in 0..self.nodes.len() {
            if state[start] != 0 {
                continue;
            }
            let mut stack = vec![(start, 0_usize)];
            state[start] = 1;
            while let Some((slot, next_child)) = stack.pop() {
                let children = self.nodes[slot].children();
                if next_child >= children.len() {
                    state[slot] = 2;
                    continue;
                }
                stack.push((slot, next_child + 1));
                let Some(child_slot) = self.index.get(&children[next_child]).copied() else {
                    continue;
                };
                match state[child_slot] {
                    0 => {
                        state[child_slot] = 1;
                        stack.push((child_slot, 0));
                    }
                    1 => {
                        if reported.insert(child_slot) {
                            issues.push(CtaTreeIssue::Cycle {
                                id: self.nodes[child_slot].id.0.clone(),
                            });
                        }
                    }
                    _ => {}
                }
            }
        }

        self.issues.extend(issues);
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum CtaTreeWire {
    List(Vec<RawCtaNode>),
    Map(BTreeMap<String, RawCtaNode>),
}

impl From<CtaTreeWire> for CtaTree {
    fn from(wire: CtaTreeWire) -> Self {
        match wire {
            CtaTreeWire::List(records) => CtaTree::from_raw(records),
            CtaTreeWire::Map(records) => CtaTree::from_raw(
                records
                    .into_iter()
                    .map(|(key, mut record)| {
                        if record.id.trim().is_empty() {
                            record.id = key;
                        }
                        record
                    })
                    .collect(),
            ),
        }
    }
}

impl From<CtaTree> for CtaTreeWire {
    fn from(tree: CtaTree) -> Self {
        CtaTreeWire::List(tree.nodes.iter().map(RawCtaNode::from).collect())
    }
}
