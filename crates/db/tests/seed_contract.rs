use std::collections::HashSet;

use serde_json::Value;

type SeedContractTestResult<T = ()> = Result<T, String>;

macro_rules! require {
    ($cond:expr) => {
        if !$cond {
            return Err(format!("assertion failed: `{}`", stringify!($cond)));
        }
    };
    ($cond:expr, $($arg:tt)*) => {
        if !$cond {
            return Err(format!($($arg)*));
        }
    };
}

macro_rules! require_eq {
    ($left:expr, $right:expr) => {
        if $left != $right {
            return Err(format!(
                "assertion failed: `left == right` (`{:?}` != `{:?}`)",
                $left,
                $right
            ));
        }
    };
}

const ACTIONS: &[&str] = &["show_children", "redirect", "send"];
const INTENTS: &[&str] =
    &["general_inquiry", "service_inquiry", "appointment_inquiry", "sales_inquiry"];

fn require_array<'a>(value: &'a Value, field_name: &str) -> SeedContractTestResult<&'a [Value]> {
    value
        .as_array()
        .map(|values| values.as_slice())
        .ok_or_else(|| format!("{field_name} should be an array"))
}

fn require_str<'a>(value: &'a Value, field_name: &str) -> SeedContractTestResult<&'a str> {
    value
        .get(field_name)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("{field_name} should be a string"))
}

fn demo_tenants() -> SeedContractTestResult<Value> {
    serde_json::from_str(include_str!("../../../config/fixtures/demo_tenants.json"))
        .map_err(|error| format!("demo tenant JSON must parse: {error}"))
}

#[test]
fn demo_tenants_have_unique_ids_and_prompts() -> SeedContractTestResult {
    let raw = demo_tenants()?;
    let tenants = require_array(&raw, "tenants")?;
    let mut seen = HashSet::new();

    require_eq!(tenants.len(), 2);
    for tenant in tenants {
        let tenant_id = require_str(tenant, "tenant_id")?;
        require!(seen.insert(tenant_id.to_string()), "duplicate tenant id: {}", tenant_id);
        require!(!require_str(tenant, "system_prompt")?.trim().is_empty());
    }

    Ok(())
}

#[test]
fn demo_cta_trees_are_closed_and_typed() -> SeedContractTestResult {
    let raw = demo_tenants()?;

    for tenant in require_array(&raw, "tenants")? {
        let Some(tree) = tenant.get("cta_tree") else {
            require!(
                tenant.get("cta_entry_points").is_none(),
                "entry points without a tree for {}",
                require_str(tenant, "tenant_id")?
            );
            continue;
        };

        let nodes = require_array(tree, "cta_tree")?;
        let ids =
            nodes.iter().map(|node| require_str(node, "id")).collect::<Result<HashSet<_>, _>>()?;
        require_eq!(ids.len(), nodes.len());

        for node in nodes {
            let id = require_str(node, "id")?;
            let action = require_str(node, "action")?;
            require!(ACTIONS.contains(&action), "unknown action {} on {}", action, id);
            match action {
                "show_children" => {
                    let children = require_array(
                        node.get("children").unwrap_or(&Value::Null),
                        "children",
                    )?;
                    require!(!children.is_empty(), "{} has no children", id);
                    for child in children {
                        let child = child.as_str().unwrap_or_default();
                        require!(ids.contains(child), "{} points at missing child {}", id, child);
                    }
                }
                "redirect" => require!(require_str(node, "url")?.starts_with("https://")),
                _ => require!(!require_str(node, "message")?.is_empty()),
            }
        }

        if let Some(entry_points) = tenant.get("cta_entry_points").and_then(Value::as_object) {
            for (intent, node_id) in entry_points {
                require!(INTENTS.contains(&intent.as_str()), "unknown intent {}", intent);
                let node_id = node_id.as_str().unwrap_or_default();
                require!(ids.contains(node_id), "entry point {} is missing", node_id);
            }
        }
    }

    Ok(())
}

#[test]
fn demo_crm_connectors_only_expose_known_tools() -> SeedContractTestResult {
    let raw = demo_tenants()?;
    let known = ["search_contact", "create_contact", "create_deal"];

    for tenant in require_array(&raw, "tenants")? {
        let Some(crm) = tenant.get("crm") else { continue };
        require_eq!(require_str(crm, "kind")?, "http");
        require!(!require_str(crm, "base_url")?.is_empty());
        if let Some(tools) = crm.get("exposed_tools") {
            for tool in require_array(tools, "exposed_tools")? {
                let tool = tool.as_str().unwrap_or_default();
                require!(known.contains(&tool), "unknown tool {}", tool);
            }
        }
    }

    Ok(())
}
