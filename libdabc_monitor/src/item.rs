use super::command::CommandItem;
use super::history::HistoryItem;
use super::object::ObjectItem;
use super::transport::{
    image_url, Request, RequestToken, ResponseBody, ResponseKind, Transport, TransportResult,
};
use super::value::ValueItem;

/// Dispatch tag derived from a node's `kind` and `view` attributes, deciding
/// which item flavor handles the node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemKind {
    Rate,
    Log,
    Command,
    Image,
    /// FESA-published object, class name without the prefix
    Fesa(String),
    /// ROOT-streamed object, class name without the prefix
    Root(String),
    Generic,
}

impl ItemKind {
    /// Classify a node the way the display ladder does: explicit kinds first,
    /// then the view hint, then the generic fallback
    pub fn classify(kind: Option<&str>, view: Option<&str>) -> ItemKind {
        if let Some(kind) = kind {
            if kind == "rate" {
                return ItemKind::Rate;
            }
            if kind == "log" {
                return ItemKind::Log;
            }
            if kind == "DABC.Command" {
                return ItemKind::Command;
            }
            if let Some(class) = kind.strip_prefix("FESA.") {
                return ItemKind::Fesa(String::from(class));
            }
            if let Some(class) = kind.strip_prefix("ROOT.") {
                return ItemKind::Root(String::from(class));
            }
        }
        match view {
            Some("gauge") => ItemKind::Rate,
            Some("log") => ItemKind::Log,
            Some("png") | Some("image") => ItemKind::Image,
            _ => ItemKind::Generic,
        }
    }

    /// Object kinds carry a binary payload and go through the object state
    /// machine
    pub fn is_object(&self) -> bool {
        matches!(self, ItemKind::Fesa(_) | ItemKind::Root(_))
    }
}

/// Item showing a server-rendered image, refetched as a whole on each poll
#[derive(Debug)]
pub struct ImageItem {
    pub name: String,
    data: Option<Vec<u8>>,
    pending: Option<RequestToken>,
    force: bool,
    rendered: bool,
}

impl ImageItem {
    pub fn new(name: &str) -> Self {
        Self {
            name: String::from(name),
            data: None,
            pending: None,
            force: true,
            rendered: false,
        }
    }

    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
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
        self.data = None;
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
        if self.data.is_some() && !self.force && !monitoring {
            return None;
        }
        let request = Request {
            url: image_url(&self.name),
            kind: ResponseKind::Binary,
        };
        let token = transport.submit(request);
        self.pending = Some(token);
        self.force = false;
        Some(token)
    }

    /// Returns whether the picture changed
    pub fn on_response(&mut self, token: RequestToken, result: TransportResult) -> bool {
        if self.pending != Some(token) {
            log::debug!("Dropping image response for stale request {token:?}");
            return false;
        }
        self.pending = None;
        match result {
            Ok(ResponseBody::Binary(data)) => {
                let modified = self.data.as_deref() != Some(data.as_slice());
                self.data = Some(data);
                modified
            }
            Ok(ResponseBody::Document(_)) => {
                log::warn!("Image fetch for {} returned a document body", self.name);
                false
            }
            Err(e) => {
                log::warn!("Image fetch for {} failed: {e}", self.name);
                false
            }
        }
    }
}

/// Closed set of item flavors the manager keeps in its registry
#[derive(Debug)]
pub enum MonitorItem {
    Value(ValueItem),
    History(HistoryItem),
    Object(ObjectItem),
    Command(CommandItem),
    Image(ImageItem),
}

impl MonitorItem {
    pub fn name(&self) -> &str {
        match self {
            MonitorItem::Value(item) => &item.name,
            MonitorItem::History(item) => &item.name,
            MonitorItem::Object(item) => &item.name,
            MonitorItem::Command(item) => &item.name,
            MonitorItem::Image(item) => &item.name,
        }
    }

    pub fn pending_token(&self) -> Option<RequestToken> {
        match self {
            MonitorItem::Value(item) => item.pending_token(),
            MonitorItem::History(item) => item.pending_token(),
            MonitorItem::Object(item) => item.pending_token(),
            MonitorItem::Command(item) => item.pending_token(),
            MonitorItem::Image(item) => item.pending_token(),
        }
    }

    pub fn clear(&mut self, transport: &mut dyn Transport) {
        match self {
            MonitorItem::Value(item) => item.clear(transport),
            MonitorItem::History(item) => item.clear(transport),
            MonitorItem::Object(item) => item.clear(transport),
            MonitorItem::Command(item) => item.clear(transport),
            MonitorItem::Image(item) => item.clear(transport),
        }
    }

    pub fn is_rendered(&self) -> bool {
        match self {
            MonitorItem::Value(item) => item.is_rendered(),
            MonitorItem::History(item) => item.is_rendered(),
            MonitorItem::Object(item) => item.is_rendered(),
            MonitorItem::Command(_) => false,
            MonitorItem::Image(item) => item.is_rendered(),
        }
    }

    pub fn set_rendered(&mut self, rendered: bool) {
        match self {
            MonitorItem::Value(item) => item.set_rendered(rendered),
            MonitorItem::History(item) => item.set_rendered(rendered),
            MonitorItem::Object(item) => item.set_rendered(rendered),
            MonitorItem::Command(_) => (),
            MonitorItem::Image(item) => item.set_rendered(rendered),
        }
    }

    pub fn touch(&mut self) {
        match self {
            MonitorItem::Value(item) => item.touch(),
            MonitorItem::History(item) => item.touch(),
            MonitorItem::Object(item) => item.touch(),
            MonitorItem::Command(_) => (),
            MonitorItem::Image(item) => item.touch(),
        }
    }
}
