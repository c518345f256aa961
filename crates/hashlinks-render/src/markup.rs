//! Markup produced around rendered blocks.

use serde_json::{Map, Value};
use uuid::Uuid;

use hashlinks_template::escape_html;
use hashlinks_types::{ActionMap, Attributes};

/// Inline marker left where a nested block failed.
pub fn error_marker(message: &str) -> String {
    // `--` would end the comment early.
    format!("<!-- Error: {} -->", message.replace("--", "- -"))
}

/// Container for a deferred block: the rendered content is already inside,
/// the embedding surface decides when to activate it.
pub fn lazy_container(uri: &str, instance_id: &str, content: &str) -> String {
    format!(
        "<div class=\"hashlink-lazy\" id=\"hashlink-lazy-{}\" data-hashlink-lazy=\"{}\" data-block-id=\"{}\">{}</div>",
        Uuid::now_v7(),
        escape_html(uri),
        escape_html(instance_id),
        content
    )
}

/// The object a block template is evaluated against.
///
/// Attributes are reachable both at the top level and under `attributes`;
/// `actions`, `actionResults` and `blockId` are reserved.
pub fn template_context(
    instance_id: &str,
    attributes: &Attributes,
    actions: &ActionMap,
    action_results: &Map<String, Value>,
) -> Value {
    let mut context = attributes.clone();
    context.insert("attributes".into(), Value::Object(attributes.clone()));
    context.insert(
        "actions".into(),
        Value::Object(
            actions
                .iter()
                .map(|(name, reference)| (name.clone(), Value::String(reference.clone())))
                .collect(),
        ),
    );
    context.insert(
        "actionResults".into(),
        Value::Object(action_results.clone()),
    );
    context.insert("blockId".into(), Value::String(instance_id.to_string()));
    Value::Object(context)
}

/// The attribute updates carried by an action result.
///
/// A `data` object is spread as-is; otherwise every field except the
/// `success`, `message` and `error` envelope is.
pub fn action_attributes(result: &Value) -> Attributes {
    if let Some(data) = result.get("data").and_then(Value::as_object) {
        return data.clone();
    }
    result
        .as_object()
        .map(|fields| {
            fields
                .iter()
                .filter(|(key, _)| !matches!(key.as_str(), "success" | "message" | "error"))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn error_marker_cannot_close_early() {
        assert_eq!(error_marker("a --> b"), "<!-- Error: a - -> b -->");
    }

    #[test]
    fn lazy_container_escapes_reference() {
        let html = lazy_container("hcs://12/0.0.1\"x", "root::0.0.1:0", "<p>hi</p>");
        assert!(html.contains("data-hashlink-lazy=\"hcs://12/0.0.1&quot;x\""));
        assert!(html.ends_with("<p>hi</p></div>"));
        assert!(html.starts_with("<div class=\"hashlink-lazy\""));
    }

    #[test]
    fn context_exposes_attributes_twice() {
        let attributes = json!({ "count": 2 }).as_object().cloned().unwrap();
        let mut actions = ActionMap::new();
        actions.insert("increment".into(), "0.0.77".into());
        let context = template_context("b1", &attributes, &actions, &Map::new());
        assert_eq!(context["count"], 2);
        assert_eq!(context["attributes"]["count"], 2);
        assert_eq!(context["actions"]["increment"], "0.0.77");
        assert_eq!(context["blockId"], "b1");
    }

    #[test]
    fn action_data_is_spread() {
        let with_data = json!({ "success": true, "data": { "count": 3 }, "message": "ok" });
        assert_eq!(Value::Object(action_attributes(&with_data)), json!({ "count": 3 }));

        let flat = json!({ "success": true, "count": 4, "message": "ok" });
        assert_eq!(Value::Object(action_attributes(&flat)), json!({ "count": 4 }));
    }
}
