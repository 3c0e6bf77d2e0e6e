//! Builds the outbound JSON body for one flushed batch and one forwarding rule

use serde_json::{Map, Value};

use super::types::{PendingMessage, value_to_key};

/// Field read from each message when a rule has no template
pub const CONTENT_FIELD: &str = "conteudo";

/// Render the payload for a batch.
///
/// - template + key field: `{key_field: key, content: [rendered template per message]}`
/// - key field only: `{key_field: key, content: [message.conteudo ...]}`
/// - no key field: `{content: [message data ...]}`
///
/// The key is the first message's raw value of `key_field`, falling back to
/// `key_value` when the field is absent.
pub fn render_payload(
    batch: &[PendingMessage],
    key_field: Option<&str>,
    key_value: &str,
    template: Option<&str>,
) -> Value {
    let Some(key_field) = key_field.filter(|f| !f.is_empty()) else {
        let content = batch.iter().map(|m| m.data.clone()).collect();
        return wrap(None, content);
    };

    let key = batch
        .first()
        .and_then(|m| m.data.get(key_field))
        .cloned()
        .unwrap_or_else(|| Value::String(key_value.to_string()));

    let content = match template.filter(|t| !t.is_empty()) {
        Some(template) => batch.iter().map(|m| render_template(template, &m.data)).collect(),
        None => batch
            .iter()
            .map(|m| m.data.get(CONTENT_FIELD).cloned().unwrap_or(Value::Null))
            .collect(),
    };

    wrap(Some((key_field, key)), content)
}

fn wrap(key: Option<(&str, Value)>, content: Vec<Value>) -> Value {
    let mut payload = Map::new();
    if let Some((field, value)) = key {
        payload.insert(field.to_string(), value);
    }
    payload.insert("content".to_string(), Value::Array(content));
    Value::Object(payload)
}

/// Substitute `{{field}}` for every top-level field of `data`, then try to read the
/// result as JSON. Anything that does not parse is kept as the literal string.
pub fn render_template(template: &str, data: &Value) -> Value {
    let mut rendered = template.to_string();
    if let Value::Object(fields) = data {
        for (name, value) in fields {
            let placeholder = format!("{{{{{}}}}}", name);
            if rendered.contains(&placeholder) {
                rendered = rendered.replace(&placeholder, &value_to_key(value));
            }
        }
    }

    serde_json::from_str(&rendered).unwrap_or(Value::String(rendered))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn batch(items: &[Value]) -> Vec<PendingMessage> {
        items
            .iter()
            .enumerate()
            .map(|(i, data)| PendingMessage {
                message_id: i as u64 + 1,
                data: data.clone(),
            })
            .collect()
    }

    #[test]
    fn test_bare_word_stays_a_string() {
        assert_eq!(render_template("{{x}}", &json!({"x": "hi"})), json!("hi"));
    }

    #[test]
    fn test_substituted_json_is_parsed() {
        assert_eq!(
            render_template(r#"{"v": {{x}}}"#, &json!({"x": 5})),
            json!({"v": 5})
        );
    }

    #[test]
    fn test_quoted_placeholder_and_repeats() {
        let rendered = render_template(
            r#"{"who": "{{name}}", "again": "{{name}}", "n": {{n}}}"#,
            &json!({"name": "ana", "n": 2}),
        );
        assert_eq!(rendered, json!({"who": "ana", "again": "ana", "n": 2}));
    }

    #[test]
    fn test_malformed_result_degrades_to_string() {
        let rendered = render_template(r#"{"v": {{missing}}}"#, &json!({"x": 1}));
        assert_eq!(rendered, json!(r#"{"v": {{missing}}}"#));

        // non-object data: nothing to substitute
        assert_eq!(render_template("plain {{x}}", &json!([1, 2])), json!("plain {{x}}"));
    }

    #[test]
    fn test_templated_payload() {
        let messages = batch(&[
            json!({"user": 7, "text": "a"}),
            json!({"user": 7, "text": "b"}),
        ]);
        let payload = render_payload(&messages, Some("user"), "7", Some(r#"{"t": "{{text}}"}"#));

        assert_eq!(
            payload,
            json!({"user": 7, "content": [{"t": "a"}, {"t": "b"}]})
        );
    }

    #[test]
    fn test_untemplated_payload_uses_content_field() {
        let messages = batch(&[
            json!({"chat": "c1", "conteudo": "first"}),
            json!({"chat": "c1"}),
        ]);
        let payload = render_payload(&messages, Some("chat"), "c1", None);

        assert_eq!(payload, json!({"chat": "c1", "content": ["first", null]}));
    }

    #[test]
    fn test_empty_template_counts_as_untemplated() {
        let messages = batch(&[json!({"chat": "c1", "conteudo": 1})]);
        let payload = render_payload(&messages, Some("chat"), "c1", Some(""));
        assert_eq!(payload, json!({"chat": "c1", "content": [1]}));
    }

    #[test]
    fn test_no_key_field_forwards_raw_batch() {
        let messages = batch(&[json!({"a": 1}), json!({"b": 2})]);
        let payload = render_payload(&messages, None, "ignored", Some("{{a}}"));

        assert_eq!(payload, json!({"content": [{"a": 1}, {"b": 2}]}));
    }

    #[test]
    fn test_key_falls_back_to_key_value() {
        let messages = batch(&[json!({"other": 1})]);
        let payload = render_payload(&messages, Some("chat"), "c9", None);
        assert_eq!(payload["chat"], json!("c9"));
    }
}
