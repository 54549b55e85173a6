use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Fixed CRM tool vocabulary the model may call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    SearchContact,
    CreateContact,
    CreateDeal,
}

impl ToolName {
    pub const ALL: [ToolName; 3] = [Self::SearchContact, Self::CreateContact, Self::CreateDeal];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SearchContact => "search_contact",
            Self::CreateContact => "create_contact",
            Self::CreateDeal => "create_deal",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "search_contact" => Some(Self::SearchContact),
            // Older tenant prompts still reference the pre-rename name.
            "create_contact" | "create_new_contact" => Some(Self::CreateContact),
            "create_deal" => Some(Self::CreateDeal),
            _ => None,
        }
    }
}

/// Tool description handed to the model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: ToolName,
    pub description: String,
    pub parameters: Value,
}

impl ToolSpec {
    pub fn for_tool(name: ToolName) -> Self {
        match name {
            ToolName::SearchContact => Self {
                name,
                description: "Search the CRM for an existing contact by email or phone number. \
                              Run this before creating a contact to avoid duplicates."
                    .to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "email": {"type": "string", "description": "Contact email address"},
                        "phone": {"type": "string", "description": "Contact phone number"}
                    }
                }),
            },
            ToolName::CreateContact => Self {
                name,
                description: "Create a new CRM contact. Requires a name and at least one of \
                              email or phone."
                    .to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "name": {"type": "string", "description": "Contact first name"},
                        "email": {"type": "string", "description": "Contact email address"},
                        "phone": {"type": "string", "description": "Contact phone number"}
                    },
                    "required": ["name"]
                }),
            },
            ToolName::CreateDeal => Self {
                name,
                description: "Create a deal linked to a contact. Title is required; the contact \
                              id defaults to the contact captured in this conversation."
                    .to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "contact_id": {"type": "string", "description": "CRM contact id"},
                        "title": {"type": "string", "description": "Deal title"},
                        "description": {"type": "string", "description": "Deal notes"}
                    },
                    "required": ["title"]
                }),
            },
        }
    }

    /// OpenAI-compatible `tools[]` entry.
    pub fn to_function_json(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name.as_str(),
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

/// Model-issued request to run a tool. The name stays a raw string so that
/// unknown names can be rejected explicitly instead of failing to parse.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self { id: id.into(), name: name.into(), arguments }
    }

    /// Trimmed string argument. Numbers are accepted in their JSON spelling,
    /// since models often send phone numbers unquoted.
    pub fn argument(&self, key: &str) -> Option<String> {
        let value = match self.arguments.get(key)? {
            Value::String(text) => text.trim().to_string(),
            Value::Number(number) => number.to_string(),
            _ => return None,
        };
        (!value.is_empty()).then_some(value)
    }
}

/// Structured outcome fed back to the model. Failures are values, never
/// errors that abort the turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolResult {
    Success { payload: Value },
    ValidationError { message: String },
    ToolNotAvailable { tool: String },
    ToolExecutionError { message: String },
}

impl ToolResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::ValidationError { .. } => "validation_error",
            Self::ToolNotAvailable { .. } => "tool_not_available",
            Self::ToolExecutionError { .. } => "tool_execution_error",
        }
    }

    pub fn to_model_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| json!({"status": self.kind()}))
    }
}

/// A tool call and its result, kept for the rest of the current request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolExchange {
    pub call: ToolCall,
    pub result: ToolResult,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{ToolCall, ToolName, ToolResult, ToolSpec};

    #[test]
    fn parse_accepts_legacy_contact_name() {
        assert_eq!(ToolName::parse("create_new_contact"), Some(ToolName::CreateContact));
        assert_eq!(ToolName::parse("delete_contact"), None);
    }

    #[test]
    fn function_json_uses_wire_tool_names() {
        let spec = ToolSpec::for_tool(ToolName::CreateDeal);
        let json = spec.to_function_json();
        assert_eq!(json["function"]["name"], "create_deal");
        assert_eq!(json["function"]["parameters"]["required"][0], "title");
    }

    #[test]
    fn blank_arguments_read_as_missing() {
        let call = ToolCall::new("1", "search_contact", json!({"email": "  ", "phone": "555"}));
        assert_eq!(call.argument("email"), None);
        assert_eq!(call.argument("phone").as_deref(), Some("555"));
    }

    #[test]
    fn numeric_arguments_read_as_text() {
        let call = ToolCall::new(
            "1",
            "create_contact",
            json!({"phone": 5551234567_u64, "vip": true, "tags": ["a"]}),
        );
        assert_eq!(call.argument("phone").as_deref(), Some("5551234567"));
        assert_eq!(call.argument("vip"), None);
        assert_eq!(call.argument("tags"), None);
    }

    #[test]
    fn results_serialize_with_status_tag() {
        let result = ToolResult::ToolNotAvailable { tool: "delete_contact".to_string() };
        assert_eq!(result.to_model_json()["status"], "tool_not_available");
        assert_eq!(result.kind(), "tool_not_available");
    }
}
