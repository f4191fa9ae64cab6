use serde_json::Value;
use tracing::debug;

use super::sanitize::sanitize_tool_name;

/// Typed view of one item in the provider's `output` array.
///
/// The provider returns a heterogeneous, loosely-typed list; it is translated
/// into this variant immediately on receipt so downstream code never touches
/// the raw JSON shape.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputItem {
    Message { text: String },
    ToolUse { name: String, arguments: Value },
    ToolResult { name: Option<String>, output: Value },
}

/// Translate the raw provider output array, sanitizing tool names as they
/// cross the boundary. Unrecognized item kinds are dropped.
pub(super) fn translate_output(output: &[Value]) -> Vec<OutputItem> {
    let mut items = Vec::with_capacity(output.len());
    for raw in output {
        let kind = raw.get("type").and_then(Value::as_str).unwrap_or("");
        match kind {
            "message" => {
                if let Some(text) = extract_message_text(raw) {
                    items.push(OutputItem::Message { text });
                }
            }
            "mcp_call" | "tool_use" | "function_call" => {
                let name = raw
                    .get("name")
                    .and_then(Value::as_str)
                    .map(sanitize_tool_name)
                    .unwrap_or_default();
                let arguments = raw
                    .get("arguments")
                    .cloned()
                    .unwrap_or(Value::Null);
                items.push(OutputItem::ToolUse { name, arguments });
            }
            "mcp_call_output" | "tool_result" => {
                let name = raw
                    .get("name")
                    .and_then(Value::as_str)
                    .map(sanitize_tool_name);
                let output = raw.get("output").cloned().unwrap_or(Value::Null);
                items.push(OutputItem::ToolResult { name, output });
            }
            other => {
                debug!("skipping unrecognized output item type {:?}", other);
            }
        }
    }
    items
}

/// First plain-text assistant message in the response, if any.
pub(super) fn first_message_text(items: &[OutputItem]) -> Option<String> {
    items.iter().find_map(|item| match item {
        OutputItem::Message { text } if !text.is_empty() => Some(text.clone()),
        _ => None,
    })
}

fn extract_message_text(raw: &Value) -> Option<String> {
    let content = raw.get("content")?.as_array()?;
    for part in content {
        let part_type = part.get("type").and_then(Value::as_str).unwrap_or("");
        if part_type == "output_text" {
            if let Some(text) = part.get("text").and_then(Value::as_str) {
                return Some(text.to_string());
            }
        }
    }
    None
}
