use serde_json::Value;

use super::HttpResponse;

#[derive(Debug, Clone, PartialEq)]
pub enum Expectation {
    /// Response status equals the code.
    Status(u16),
    /// Body parses as JSON and the value at the dotted path equals `equals`.
    JsonPath { path: String, equals: Value },
}

/// Named assertion on a response.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseCheck {
    pub name: String,
    pub expect: Expectation,
}

impl ResponseCheck {
    pub fn status(name: impl Into<String>, status: u16) -> Self {
        Self {
            name: name.into(),
            expect: Expectation::Status(status),
        }
    }

    pub fn json_path(name: impl Into<String>, path: impl Into<String>, equals: Value) -> Self {
        Self {
            name: name.into(),
            expect: Expectation::JsonPath {
                path: path.into(),
                equals,
            },
        }
    }

    /// Never errors: a missing response or an unparsable body is a failed check.
    pub fn passes(&self, res: Option<&HttpResponse>) -> bool {
        let Some(res) = res else {
            return false;
        };

        match &self.expect {
            Expectation::Status(code) => res.status == *code,
            Expectation::JsonPath { path, equals } => serde_json::from_slice::<Value>(&res.body)
                .ok()
                .is_some_and(|doc| lookup(&doc, path) == Some(equals)),
        }
    }
}

/// Resolves `a.b.0.c` against objects and arrays. An empty path is the document root.
pub fn lookup<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path.trim().trim_start_matches("$.");
    if path.is_empty() || path == "$" {
        return Some(doc);
    }

    path.split('.').try_fold(doc, |cur, key| match cur {
        Value::Object(map) => map.get(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use serde_json::json;

    fn response(status: u16, body: &'static str) -> HttpResponse {
        HttpResponse {
            status,
            body: Bytes::from_static(body.as_bytes()),
            headers: Vec::new(),
        }
    }

    #[test]
    fn status_check() {
        let check = ResponseCheck::status("is 200", 200);
        assert!(check.passes(Some(&response(200, ""))));
        assert!(!check.passes(Some(&response(503, ""))));
        assert!(!check.passes(None));
    }

    #[test]
    fn json_path_check() {
        let healthy = ResponseCheck::json_path("healthy", "status", json!(true));
        assert!(healthy.passes(Some(&response(200, r#"{"status": true}"#))));
        assert!(!healthy.passes(Some(&response(200, r#"{"status": false}"#))));
        assert!(!healthy.passes(Some(&response(200, "<html>down</html>"))));
        assert!(!healthy.passes(Some(&response(200, r#"{"other": 1}"#))));
    }

    #[test]
    fn lookup_walks_objects_and_arrays() {
        let doc = json!({"a": {"items": [{"id": 1}, {"id": 2}]}});
        assert_eq!(lookup(&doc, "a.items.1.id"), Some(&json!(2)));
        assert_eq!(lookup(&doc, "$.a.items.0.id"), Some(&json!(1)));
        assert_eq!(lookup(&doc, "a.items.9"), None);
        assert_eq!(lookup(&doc, "a.items.x"), None);
        assert_eq!(lookup(&doc, ""), Some(&doc));
    }
}
