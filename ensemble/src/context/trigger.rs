//! Compiled trigger forms. Specs are validated at manifest load; compilation
//! here turns them into matchers applied on the session's hot path.

use serde_json::Value;

pub(super) enum TextMatcher {
    Regex(regex::Regex),
    Equals(String),
    Contains(String),
}

pub(super) struct AgentTextTrigger {
    pub var: String,
    pub agent: String,
    pub matcher: TextMatcher,
    /// Constant to write on match; when absent, the first capture group (or
    /// the matched text) is written.
    pub set_value: Option<Value>,
}

impl AgentTextTrigger {
    pub fn apply(&self, text: &str) -> Option<Value> {
        match &self.matcher {
            TextMatcher::Regex(re) => {
                let caps = re.captures(text)?;
                if let Some(value) = &self.set_value {
                    return Some(value.clone());
                }
                let matched = caps
                    .get(1)
                    .or_else(|| caps.get(0))
                    .map(|m| m.as_str().to_string())?;
                Some(Value::String(matched))
            }
            TextMatcher::Equals(needle) => {
                (text == needle).then(|| self.constant_or(text))
            }
            TextMatcher::Contains(needle) => {
                text.contains(needle.as_str()).then(|| self.constant_or(text))
            }
        }
    }

    fn constant_or(&self, text: &str) -> Value {
        self.set_value
            .clone()
            .unwrap_or_else(|| Value::String(text.to_string()))
    }
}

pub(super) struct UiResponseTrigger {
    pub var: String,
    pub tool: String,
    /// Dotted path into the client response payload, e.g. `form.approved`.
    pub response_key: String,
}

impl UiResponseTrigger {
    pub fn extract(&self, payload: &Value) -> Option<Value> {
        let mut current = payload;
        for segment in self.response_key.split('.') {
            current = current.get(segment)?;
        }
        Some(current.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn regex_prefers_first_capture_group() {
        let t = AgentTextTrigger {
            var: "id".to_string(),
            agent: "a".to_string(),
            matcher: TextMatcher::Regex(regex::Regex::new(r"ticket (\w+)").unwrap()),
            set_value: None,
        };
        assert_eq!(t.apply("see ticket AB12 now"), Some(json!("AB12")));
        assert_eq!(t.apply("nothing here"), None);
    }

    #[test]
    fn contains_writes_constant_when_declared() {
        let t = AgentTextTrigger {
            var: "done".to_string(),
            agent: "a".to_string(),
            matcher: TextMatcher::Contains("FINISHED".to_string()),
            set_value: Some(json!(true)),
        };
        assert_eq!(t.apply("all FINISHED, bye"), Some(json!(true)));
    }

    #[test]
    fn extract_walks_dotted_path() {
        let t = UiResponseTrigger {
            var: "email".to_string(),
            tool: "form".to_string(),
            response_key: "contact.email".to_string(),
        };
        let payload = json!({"contact": {"email": "a@b.c"}});
        assert_eq!(t.extract(&payload), Some(json!("a@b.c")));
        assert_eq!(t.extract(&json!({"contact": {}})), None);
    }
}
