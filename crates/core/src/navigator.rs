//! Stateless CTA navigation over a tenant's tree.
//!
//! Every call takes the tenant configuration as input; the only persistent
//! position is the display cursor stored on the session.

use crate::domain::cta::{CtaAction, CtaNode, CtaNodeId, CtaPayload, CtaSummary};
use crate::domain::intent::Intent;
use crate::domain::tenant::TenantConfig;

pub const UNKNOWN_CTA_TEXT: &str = "That option is no longer available.";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CursorMove {
    Keep,
    MoveTo(CtaNodeId),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClickOutcome {
    pub node: Option<CtaSummary>,
    pub text: String,
    pub ctas: Vec<CtaSummary>,
    pub cursor: CursorMove,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct CtaNavigator;

impl CtaNavigator {
    /// Root-level node configured for `intent`, or `None` when the tenant has
    /// no mapping or the mapped node was excluded from the tree.
    pub fn entry_point(&self, tenant: &TenantConfig, intent: Intent) -> Option<CtaSummary> {
        let node_id = tenant.cta_entry_points.get(&intent)?;
        self.node(tenant, node_id).map(CtaNode::summary)
    }

    /// Immediate children of `node_id` in configured order. Unknown nodes,
    /// leaves, and dangling child references all yield nothing.
    pub fn children_of(&self, tenant: &TenantConfig, node_id: &CtaNodeId) -> Vec<CtaSummary> {
        let Some(tree) = tenant.cta_tree.as_ref() else {
            return Vec::new();
        };
        let Some(node) = tree.get(node_id) else {
            return Vec::new();
        };

        node.children().iter().filter_map(|child| tree.get(child)).map(CtaNode::summary).collect()
    }

    /// CTA set to display for an entry node: its children, or the node itself
    /// when it is a leaf such as a booking redirect.
    pub fn entry_ctas(&self, tenant: &TenantConfig, intent: Intent) -> Vec<CtaSummary> {
        let Some(entry) = self.entry_point(tenant, intent) else {
            return Vec::new();
        };

        match entry.action {
            CtaAction::ShowChildren => self.children_of(tenant, &entry.id),
            CtaAction::Redirect | CtaAction::Send => vec![entry],
        }
    }

    pub fn click(&self, tenant: &TenantConfig, cta_id: &CtaNodeId) -> ClickOutcome {
        let Some(node) = self.node(tenant, cta_id) else {
            return ClickOutcome {
                node: None,
                text: UNKNOWN_CTA_TEXT.to_string(),
                ctas: Vec::new(),
                cursor: CursorMove::Keep,
            };
        };

        match &node.payload {
            CtaPayload::Children(_) => ClickOutcome {
                node: Some(node.summary()),
                text: format!("Here are your options for {}:", node.label),
                ctas: self.children_of(tenant, &node.id),
                cursor: CursorMove::MoveTo(node.id.clone()),
            },
            CtaPayload::Url(url) => ClickOutcome {
                node: Some(node.summary()),
                text: format!("You can continue here: <a href=\"{url}\">{}</a>", node.label),
                ctas: vec![node.summary()],
                cursor: CursorMove::Keep,
            },
            CtaPayload::Message(message) => ClickOutcome {
                node: Some(node.summary()),
                text: message.clone(),
                ctas: Vec::new(),
                cursor: CursorMove::Keep,
            },
        }
    }

    /// First `redirect` URL reachable from the intent's entry node, searching
    /// the entry itself and then its immediate children.
    pub fn redirect_url_for(&self, tenant: &TenantConfig, intent: Intent) -> Option<String> {
        let entry = self.entry_point(tenant, intent)?;
        if let Some(url) = entry.url.filter(|_| entry.action == CtaAction::Redirect) {
            return Some(url);
        }

        self.children_of(tenant, &entry.id)
            .into_iter()
            .find(|child| child.action == CtaAction::Redirect)
            .and_then(|child| child.url)
    }

    fn node<'a>(&self, tenant: &'a TenantConfig, node_id: &CtaNodeId) -> Option<&'a CtaNode> {
        tenant.cta_tree.as_ref()?.get(node_id)
    }
}

#[cfg(test)]
mod tests {
    use super::{CtaNavigator, CursorMove, UNKNOWN_CTA_TEXT};
    use crate::domain::cta::{CtaAction, CtaNode, CtaNodeId, CtaTree};
    use crate::domain::intent::Intent;
    use crate::domain::tenant::TenantConfig;

    fn tenant() -> TenantConfig {
        let tree = CtaTree::from_nodes(vec![
            CtaNode::show_children("main_menu", "Main menu", &["menu", "hours", "book"]),
            CtaNode::send("menu", "Our menu", "We serve espresso, filter coffee and pastries."),
            CtaNode::send("hours", "Opening hours", "Open 7am to 6pm every day."),
            CtaNode::show_children("book", "Book a table", &["book_online", "ghost"]),
            CtaNode::redirect("book_online", "Book online", "https://cal.example/coffee"),
        ]);
        TenantConfig::new("coffee-shop", "You are the coffee shop assistant.")
            .with_cta_tree(tree)
            .with_entry_point(Intent::General, "main_menu")
            .with_entry_point(Intent::AppointmentInquiry, "book")
            .with_entry_point(Intent::SalesInquiry, "removed_node")
    }

    fn ids(summaries: &[crate::domain::cta::CtaSummary]) -> Vec<&str> {
        summaries.iter().map(|summary| summary.id.as_str()).collect()
    }

    #[test]
    fn entry_point_then_children_returns_configured_order() {
        let navigator = CtaNavigator;
        let tenant = tenant();

        let entry = navigator.entry_point(&tenant, Intent::General).expect("entry point");
        let children = navigator.children_of(&tenant, &entry.id);

        assert_eq!(ids(&children), vec!["menu", "hours", "book"]);
    }

    #[test]
    fn missing_mapping_or_missing_node_yields_no_entry_point() {
        let navigator = CtaNavigator;
        let tenant = tenant();

        assert!(navigator.entry_point(&tenant, Intent::ServiceInquiry).is_none());
        assert!(navigator.entry_point(&tenant, Intent::SalesInquiry).is_none());
    }

    #[test]
    fn leaf_and_unknown_nodes_have_no_children() {
        let navigator = CtaNavigator;
        let tenant = tenant();

        assert!(navigator.children_of(&tenant, &CtaNodeId("hours".into())).is_empty());
        assert!(navigator.children_of(&tenant, &CtaNodeId("book_online".into())).is_empty());
        assert!(navigator.children_of(&tenant, &CtaNodeId("nope".into())).is_empty());
        assert!(navigator
            .children_of(&TenantConfig::new("bare", "p"), &CtaNodeId("main_menu".into()))
            .is_empty());
    }

    #[test]
    fn children_never_include_grandchildren_or_dangling_ids() {
        let navigator = CtaNavigator;
        let tenant = tenant();

        let children = navigator.children_of(&tenant, &CtaNodeId("book".into()));
        assert_eq!(ids(&children), vec!["book_online"]);
        assert_eq!(children[0].url.as_deref(), Some("https://cal.example/coffee"));
    }

    #[test]
    fn click_on_menu_node_moves_cursor() {
        let navigator = CtaNavigator;
        let outcome = navigator.click(&tenant(), &CtaNodeId("book".into()));

        assert_eq!(outcome.text, "Here are your options for Book a table:");
        assert_eq!(outcome.cursor, CursorMove::MoveTo(CtaNodeId("book".into())));
        assert_eq!(ids(&outcome.ctas), vec!["book_online"]);
    }

    #[test]
    fn click_on_send_node_returns_scripted_message() {
        let navigator = CtaNavigator;
        let outcome = navigator.click(&tenant(), &CtaNodeId("hours".into()));

        assert_eq!(outcome.text, "Open 7am to 6pm every day.");
        assert_eq!(outcome.cursor, CursorMove::Keep);
        assert!(outcome.ctas.is_empty());
    }

    #[test]
    fn click_on_unknown_node_is_neutral() {
        let navigator = CtaNavigator;
        let outcome = navigator.click(&tenant(), &CtaNodeId("ghost".into()));

        assert!(outcome.node.is_none());
        assert_eq!(outcome.text, UNKNOWN_CTA_TEXT);
        assert!(outcome.ctas.is_empty());
    }

    #[test]
    fn redirect_url_is_found_under_appointment_entry() {
        let navigator = CtaNavigator;
        let tenant = tenant();

        assert_eq!(
            navigator.redirect_url_for(&tenant, Intent::AppointmentInquiry).as_deref(),
            Some("https://cal.example/coffee")
        );
        assert!(navigator.redirect_url_for(&tenant, Intent::General).is_none());
        assert_eq!(
            navigator.entry_ctas(&tenant, Intent::AppointmentInquiry)[0].action,
            CtaAction::Redirect
        );
    }
}
