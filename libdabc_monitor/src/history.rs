use std::collections::VecDeque;

use fxhash::FxHashMap;
use serde_json::Value;

use super::error::{HierarchyError, HistoryError};
use super::transport::{
    history_url, Request, RequestToken, ResponseBody, ResponseKind, Transport, TransportResult,
};

/// One observed field-set of an item, either the current one or a past entry.
/// Entries are sparse: a field the server did not repeat is simply absent
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    fields: FxHashMap<String, String>,
}

impl Snapshot {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn set(&mut self, name: &str, value: &str) {
        self.fields.insert(String::from(name), String::from(value));
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn from_json(obj: &serde_json::Map<String, Value>) -> Self {
        let mut snapshot = Snapshot::default();
        for (key, value) in obj {
            if key.starts_with('_') || key == "history" {
                continue;
            }
            match value {
                Value::String(s) => snapshot.set(key, s),
                Value::Number(n) => snapshot.set(key, &n.to_string()),
                Value::Bool(b) => snapshot.set(key, &b.to_string()),
                _ => (),
            }
        }
        snapshot
    }
}

/// Item keeping a current snapshot plus a bounded trailing history.
///
/// The server sends batches of past entries ordered oldest first; the ring
/// appends at the back and evicts from the front. A gap signal or a batch that
/// alone fills the limit replaces the ring wholesale, since the server cannot
/// guarantee continuity in that case.
#[derive(Debug)]
pub struct HistoryItem {
    pub name: String,
    /// Dispatch tag of the underlying node, "rate" or "log"
    pub class_name: String,
    pub version: i64,
    pub limit: usize,
    current: Option<Snapshot>,
    history: VecDeque<Snapshot>,
    pending: Option<RequestToken>,
    force: bool,
    rendered: bool,
}

impl HistoryItem {
    pub fn new(name: &str, class_name: &str, limit: usize) -> Self {
        Self {
            name: String::from(name),
            class_name: String::from(class_name),
            version: 0,
            limit: limit.max(1),
            current: None,
            history: VecDeque::new(),
            pending: None,
            force: true,
            rendered: false,
        }
    }

    pub fn current(&self) -> Option<&Snapshot> {
        self.current.as_ref()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn is_rendered(&self) -> bool {
        self.rendered
    }

    pub fn set_rendered(&mut self, rendered: bool) {
        self.rendered = rendered;
    }

    /// Force a fetch on the next check even without the monitoring flag
    pub fn touch(&mut self) {
        self.force = true;
    }

    pub fn pending_token(&self) -> Option<RequestToken> {
        self.pending
    }

    /// Abort the outstanding request and drop all accumulated state
    pub fn clear(&mut self, transport: &mut dyn Transport) {
        if let Some(token) = self.pending.take() {
            transport.cancel(token);
        }
        self.version = 0;
        self.current = None;
        self.history.clear();
        self.force = true;
    }

    /// Issue the next poll, honouring the single-in-flight invariant and the
    /// monitoring gate
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
            url: history_url(&self.name, self.version, self.limit),
            kind: ResponseKind::Document,
        };
        let token = transport.submit(request);
        self.pending = Some(token);
        self.force = false;
        Some(token)
    }

    /// Handle a routed response. Returns whether anything changed, so the
    /// caller redraws only on real modifications
    pub fn on_response(
        &mut self,
        token: RequestToken,
        result: TransportResult,
    ) -> Result<bool, HistoryError> {
        if self.pending != Some(token) {
            log::debug!("Dropping history response for stale request {token:?}");
            return Ok(false);
        }
        self.pending = None;

        let doc = match result {
            Ok(ResponseBody::Document(doc)) => doc,
            Ok(ResponseBody::Binary(_)) => return Err(HistoryError::NotADocument),
            Err(e) => {
                log::warn!("History poll for {} failed: {e}", self.name);
                return Ok(false);
            }
        };

        let obj = doc
            .as_object()
            .ok_or(HistoryError::BadDocument(HierarchyError::NotAnObject))?;
        let new_version = obj
            .get("_version")
            .and_then(Value::as_i64)
            .ok_or(HistoryError::BadDocument(HierarchyError::MissingVersion))?;
        let gap = obj.get("_gap").and_then(Value::as_bool).unwrap_or(false);

        let current = Snapshot::from_json(obj);
        let mut entries = Vec::new();
        if let Some(Value::Array(past)) = obj.get("history") {
            for entry in past {
                if let Some(fields) = entry.as_object() {
                    entries.push(Snapshot::from_json(fields));
                }
            }
        }

        let mut modified = new_version != self.version;
        if new_version > self.version {
            self.version = new_version;
        } else if new_version < self.version {
            log::warn!(
                "History version for {} went backwards ({} < {}); keeping counter",
                self.name,
                new_version,
                self.version
            );
            modified = false;
        }

        let current = (!current.is_empty()).then_some(current);
        modified |= self.merge(current, entries, gap);
        Ok(modified)
    }

    /// Reconcile a poll result into the ring. Replace wholesale when no prior
    /// history exists, when the server signals a gap, or when the new batch
    /// alone reaches the limit; otherwise append and evict from the front
    pub fn merge(
        &mut self,
        new_current: Option<Snapshot>,
        entries: Vec<Snapshot>,
        gap: bool,
    ) -> bool {
        if let Some(current) = new_current {
            self.current = Some(current);
        }

        if self.history.is_empty() || gap || entries.len() >= self.limit {
            let changed = !(self.history.is_empty() && entries.is_empty());
            self.history = entries.into_iter().collect();
            while self.history.len() > self.limit {
                self.history.pop_front();
            }
            return changed;
        }

        if entries.is_empty() {
            return false;
        }

        self.history.extend(entries);
        while self.history.len() > self.limit {
            self.history.pop_front();
        }
        true
    }

    /// Reconstruct the series of one named field across the history and the
    /// current snapshot, oldest first. A sparse entry inherits the most recent
    /// preceding value; entries before the field was ever seen are skipped
    pub fn extract_series(&self, field: &str) -> Vec<String> {
        let mut series = Vec::new();
        let mut last: Option<&str> = None;
        for snapshot in self.history.iter().chain(self.current.iter()) {
            if let Some(value) = snapshot.get(field) {
                last = Some(value);
            }
            if let Some(value) = last {
                series.push(String::from(value));
            }
        }
        series
    }

    /// Numeric variant of [extract_series]; non-numeric values are dropped
    pub fn extract_numeric_series(&self, field: &str) -> Vec<f64> {
        self.extract_series(field)
            .iter()
            .filter_map(|v| v.parse::<f64>().ok())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;
    use serde_json::json;

    fn snap(pairs: &[(&str, &str)]) -> Snapshot {
        let mut snapshot = Snapshot::default();
        for (name, value) in pairs {
            snapshot.set(name, value);
        }
        snapshot
    }

    fn snaps(values: &[&str]) -> Vec<Snapshot> {
        values.iter().map(|v| snap(&[("value", v)])).collect()
    }

    #[test]
    fn test_history_never_exceeds_limit() {
        let mut item = HistoryItem::new("/x/Rate", "rate", 5);
        for round in 0..20 {
            let batch = snaps(&[&round.to_string(), &format!("{round}b")]);
            item.merge(Some(snap(&[("value", "now")])), batch, false);
            assert!(item.history_len() <= 5, "round {round}");
        }
        // oldest entries were evicted first
        let series = item.extract_series("value");
        assert_eq!(series.len(), 6); // 5 history + current
        assert_eq!(series.last().unwrap(), "now");
        assert_eq!(series[0], "17b");
    }

    #[test]
    fn test_gap_replaces_history_wholesale() {
        let mut item = HistoryItem::new("/x/Rate", "rate", 10);
        item.merge(None, snaps(&["1", "2", "3"]), false);
        assert_eq!(item.history_len(), 3);

        let modified = item.merge(None, snaps(&["7", "8"]), true);
        assert!(modified);
        assert_eq!(item.history_len(), 2);
        assert_eq!(item.extract_series("value"), vec!["7", "8"]);
    }

    #[test]
    fn test_full_batch_replaces_history() {
        let mut item = HistoryItem::new("/x/Rate", "rate", 3);
        item.merge(None, snaps(&["1", "2"]), false);
        // a batch reaching the limit on its own signals lost continuity
        item.merge(None, snaps(&["5", "6", "7", "8"]), false);
        assert_eq!(item.history_len(), 3);
        assert_eq!(item.extract_series("value"), vec!["6", "7", "8"]);
    }

    #[test]
    fn test_no_op_merge_reports_unmodified() {
        let mut item = HistoryItem::new("/x/Rate", "rate", 10);
        item.merge(None, snaps(&["1"]), false);
        assert!(!item.merge(None, Vec::new(), false));
    }

    #[test]
    fn test_forward_fill_of_sparse_fields() {
        let mut item = HistoryItem::new("/x/Rate", "rate", 10);
        let entries = vec![
            snap(&[("value", "1"), ("time", "t0")]),
            snap(&[("time", "t1")]),
            snap(&[("value", "3")]),
        ];
        item.merge(Some(snap(&[("time", "t3")])), entries, false);

        assert_eq!(item.extract_series("value"), vec!["1", "1", "3", "3"]);
        assert_eq!(item.extract_series("time"), vec!["t0", "t1", "t1", "t3"]);
        // a field first seen mid-history yields a shorter series
        let mut late = HistoryItem::new("/x/Rate", "rate", 10);
        late.merge(None, vec![snap(&[("time", "t0")]), snap(&[("value", "9")])], false);
        assert_eq!(late.extract_series("value"), vec!["9"]);
    }

    #[test]
    fn test_numeric_series() {
        let mut item = HistoryItem::new("/x/Rate", "rate", 10);
        item.merge(None, snaps(&["1.5", "oops", "2.5"]), false);
        assert_eq!(item.extract_numeric_series("value"), vec![1.5, 2.5]);
    }

    #[test]
    fn test_poll_round_trip_and_modified_detection() {
        let mut transport = MockTransport::new();
        let mut item = HistoryItem::new("/x/Rate", "rate", 100);

        let token = item.regular_check(&mut transport, false).unwrap();
        assert_eq!(
            transport.last().1.url,
            "/x/Rate/gethistory?limit=100"
        );
        let doc = json!({
            "_version": 4,
            "value": "12.5",
            "history": [ { "value": "10" }, { "value": "11" } ]
        });
        let modified = item
            .on_response(token, Ok(ResponseBody::Document(doc.clone())))
            .unwrap();
        assert!(modified);
        assert_eq!(item.version, 4);
        assert_eq!(item.extract_series("value"), vec!["10", "11", "12.5"]);

        // same version, no new entries: a no-op poll must not report changes
        item.touch();
        let token = item.regular_check(&mut transport, false).unwrap();
        assert_eq!(
            transport.last().1.url,
            "/x/Rate/gethistory?limit=100&version=4"
        );
        let doc = json!({ "_version": 4, "value": "12.5" });
        let modified = item
            .on_response(token, Ok(ResponseBody::Document(doc)))
            .unwrap();
        assert!(!modified);
    }

    #[test]
    fn test_at_most_one_request_in_flight() {
        let mut transport = MockTransport::new();
        let mut item = HistoryItem::new("/x/Rate", "rate", 100);
        assert!(item.regular_check(&mut transport, true).is_some());
        assert!(item.regular_check(&mut transport, true).is_none());
        assert_eq!(transport.submitted.len(), 1);
    }

    #[test]
    fn test_monitoring_gate() {
        let mut transport = MockTransport::new();
        let mut item = HistoryItem::new("/x/Rate", "rate", 100);
        let token = item.regular_check(&mut transport, false).unwrap();
        item.on_response(
            token,
            Ok(ResponseBody::Document(json!({ "_version": 1, "value": "5" }))),
        )
        .unwrap();

        // fetched once and not monitored: idle polling stays off the network
        assert!(item.regular_check(&mut transport, false).is_none());
        assert!(item.regular_check(&mut transport, true).is_some());
    }

    #[test]
    fn test_stale_response_token_dropped() {
        let mut transport = MockTransport::new();
        let mut item = HistoryItem::new("/x/Rate", "rate", 100);
        item.regular_check(&mut transport, false).unwrap();
        let modified = item
            .on_response(
                RequestToken(777),
                Ok(ResponseBody::Document(json!({ "_version": 9, "value": "1" }))),
            )
            .unwrap();
        assert!(!modified);
        assert_eq!(item.version, 0);
        // the genuine request is still pending
        assert!(item.pending_token().is_some());
    }
}
