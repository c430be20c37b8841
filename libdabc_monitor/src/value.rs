use serde_json::Value;

use super::transport::{
    value_url, Request, RequestToken, ResponseBody, ResponseKind, Transport, TransportResult,
};

/// Item holding a single scalar reading, refreshed over the document endpoint.
/// Covers rate meters, log lines, and any node without a richer kind
#[derive(Debug)]
pub struct ValueItem {
    pub name: String,
    pub class_name: String,
    pub version: i64,
    value: Option<String>,
    pending: Option<RequestToken>,
    force: bool,
    rendered: bool,
}

impl ValueItem {
    pub fn new(name: &str, class_name: &str) -> Self {
        Self {
            name: String::from(name),
            class_name: String::from(class_name),
            version: 0,
            value: None,
            pending: None,
            force: true,
            rendered: false,
        }
    }

    /// Adopt the value the hierarchy document already carried, so the first
    /// draw needs no extra round trip
    pub fn seed(&mut self, value: &str) {
        if self.value.is_none() {
            self.value = Some(String::from(value));
        }
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    pub fn is_rendered(&self) -> bool {
        self.rendered
    }

    pub fn set_rendered(&mut self, rendered: bool) {
        self.rendered = rendered;
    }

    pub fn touch(&mut self) {
        self.force = true;
    }

    pub fn pending_token(&self) -> Option<RequestToken> {
        self.pending
    }

    pub fn clear(&mut self, transport: &mut dyn Transport) {
        if let Some(token) = self.pending.take() {
            transport.cancel(token);
        }
        self.version = 0;
        self.value = None;
        self.force = true;
    }

    pub fn regular_check(
        &mut self,
        transport: &mut dyn Transport,
        monitoring: bool,
    ) -> Option<RequestToken> {
        if self.pending.is_some() {
            return None;
        }
        if self.version > 0 && !self.force && !monitoring {
            return None;
        }
        let request = Request {
            url: value_url(&self.name),
            kind: ResponseKind::Document,
        };
        let token = transport.submit(request);
        self.pending = Some(token);
        self.force = false;
        Some(token)
    }

    /// Handle a routed response; returns whether the reading changed
    pub fn on_response(&mut self, token: RequestToken, result: TransportResult) -> bool {
        if self.pending != Some(token) {
            log::debug!("Dropping value response for stale request {token:?}");
            return false;
        }
        self.pending = None;

        let doc = match result {
            Ok(ResponseBody::Document(doc)) => doc,
            Ok(ResponseBody::Binary(_)) => {
                log::warn!("Value poll for {} returned a binary body", self.name);
                return false;
            }
            Err(e) => {
                log::warn!("Value poll for {} failed: {e}", self.name);
                return false;
            }
        };

        let new_value = match &doc {
            Value::Object(obj) => obj.get("value").and_then(field_to_string),
            other => field_to_string(other),
        };
        let new_version = doc.get("_version").and_then(Value::as_i64);

        let mut modified = false;
        if let Some(version) = new_version {
            if version > self.version {
                self.version = version;
                modified = true;
            }
        } else if self.version == 0 {
            // unversioned nodes still count as fetched once
            self.version = 1;
        }
        if let Some(value) = new_value {
            if self.value.as_deref() != Some(value.as_str()) {
                modified = true;
            }
            self.value = Some(value);
        }
        modified
    }
}

fn field_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
