use serde_json::Value;

const INDENT: &str = "  ";

/// Flatten a patient record into display lines.
///
/// Object keys become headings with underscores shown as spaces, nested
/// values are indented beneath them and array items are bulleted.
pub fn render_record(record: &Value) -> Vec<String> {
    let mut lines = Vec::new();
    render_into(record, 0, &mut lines);
    lines
}

fn render_into(value: &Value, depth: usize, lines: &mut Vec<String>) {
    let pad = INDENT.repeat(depth);
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let label = key.replace('_', " ");
                match scalar(child) {
                    Some(text) => lines.push(format!("{pad}{label}: {text}")),
                    None => {
                        lines.push(format!("{pad}{label}:"));
                        render_into(child, depth + 1, lines);
                    }
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                match scalar(item) {
                    Some(text) => lines.push(format!("{pad}- {text}")),
                    None => {
                        lines.push(format!("{pad}-"));
                        render_into(item, depth + 1, lines);
                    }
                }
            }
        }
        other => {
            if let Some(text) = scalar(other) {
                lines.push(format!("{pad}{text}"));
            }
        }
    }
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        // null renders as nothing, same as an absent field
        Value::Null => None,
        Value::Object(_) | Value::Array(_) => None,
    }
}
