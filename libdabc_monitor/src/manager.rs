use fxhash::FxHashMap;

use super::command::{CommandOutcome, CommandResult};
use super::config::MonitorConfig;
use super::error::ManagerError;
use super::history::HistoryItem;
use super::item::{ImageItem, ItemKind, MonitorItem};
use super::object::{ObjectItem, ObjectOutcome};
use super::render::Renderer;
use super::transport::{normalize_path, RequestToken, Transport, TransportResult};
use super::tree::{HierarchyTree, TreeOutcome};
use super::value::ValueItem;

/// Owner of an in-flight request, for routing completions back
#[derive(Debug, Clone, PartialEq, Eq)]
enum Route {
    Tree,
    Item(String),
}

/// What handling one item response or check calls for, recorded first so the
/// registry borrow is released before the renderer and other items are touched
enum ItemEvent {
    None,
    Value(String, String),
    History,
    Object,
    MasterAdvanced,
    NeedMaster { master: String, version: i64 },
    Desync,
    Command(CommandResult),
    Image,
}

/// Compute the absolute path of a master record from an item path and the
/// node's relative reference. Each leading `../` walks one segment up from the
/// item; a bare name addresses a child of the item itself
pub fn resolve_master_name(item_path: &str, reference: &str) -> Result<String, ManagerError> {
    let mut segments: Vec<&str> = item_path.split('/').filter(|s| !s.is_empty()).collect();
    let mut rest = reference;
    while let Some(stripped) = rest.strip_prefix("../") {
        if segments.pop().is_none() {
            return Err(ManagerError::BadMasterReference(
                String::from(item_path),
                String::from(reference),
            ));
        }
        rest = stripped;
    }

    let mut resolved = String::new();
    for segment in &segments {
        resolved.push('/');
        resolved.push_str(segment);
    }
    for segment in rest.split('/').filter(|s| !s.is_empty()) {
        resolved.push('/');
        resolved.push_str(segment);
    }
    if resolved.is_empty() {
        resolved.push('/');
    }
    Ok(resolved)
}

/// Central registry driving the whole client: one hierarchy tree plus any
/// number of displayed items, all advanced by periodic [Manager::tick] calls
/// on a single thread. Responses may complete in any order; the token routes
/// decide which item handles which
pub struct Manager<T: Transport, R: Renderer> {
    config: MonitorConfig,
    transport: T,
    renderer: R,
    tree: HierarchyTree,
    items: FxHashMap<String, MonitorItem>,
    routes: FxHashMap<RequestToken, Route>,
    monitoring: bool,
}

impl<T: Transport, R: Renderer> Manager<T, R> {
    pub fn new(config: MonitorConfig, transport: T, renderer: R) -> Self {
        let tree = HierarchyTree::new(config.compact, config.expand_ceiling);
        let monitoring = config.monitoring;
        Self {
            config,
            transport,
            renderer,
            tree,
            items: FxHashMap::default(),
            routes: FxHashMap::default(),
            monitoring,
        }
    }

    pub fn tree(&self) -> &HierarchyTree {
        &self.tree
    }

    pub fn find_item(&self, path: &str) -> Option<&MonitorItem> {
        self.items.get(&normalize_path(path))
    }

    pub fn set_monitoring(&mut self, monitoring: bool) {
        self.monitoring = monitoring;
    }

    /// Advance everything one step: drain finished requests, reload the tree
    /// if needed, and give every item its regular check
    pub fn tick(&mut self) -> Result<(), ManagerError> {
        let completed = self.transport.poll_completed();
        for (token, result) in completed {
            self.dispatch(token, result)?;
        }

        if let Some(token) = self.tree.regular_check(&mut self.transport) {
            self.routes.insert(token, Route::Tree);
        }

        let names: Vec<String> = self.items.keys().cloned().collect();
        for name in names {
            self.check_item(&name)?;
        }
        Ok(())
    }

    /// Start displaying the item at the given path, creating the matching item
    /// flavor from the node's kind on first sight
    pub fn display_item(&mut self, path: &str) -> Result<(), ManagerError> {
        let path = normalize_path(path);
        let node = self
            .tree
            .find(&path)
            .ok_or_else(|| ManagerError::NodeNotFound(path.clone()))?;
        let kind = ItemKind::classify(node.kind.as_deref(), node.view.as_deref());
        let node_kind = node.kind.clone();
        let node_value = node.value.clone();
        let node_master = node.master.clone();
        let node_history = node.history;

        if let Some(item) = self.items.get_mut(&path) {
            item.set_rendered(true);
            item.touch();
            return Ok(());
        }

        let class_name = node_kind.unwrap_or_else(|| {
            String::from(match kind {
                ItemKind::Rate => "rate",
                ItemKind::Log => "log",
                _ => "",
            })
        });

        let mut item = match kind {
            ItemKind::Rate | ItemKind::Log if node_history.is_some() => MonitorItem::History(
                HistoryItem::new(&path, &class_name, self.config.history_limit),
            ),
            ItemKind::Rate | ItemKind::Log | ItemKind::Generic => {
                let mut value = ValueItem::new(&path, &class_name);
                if let Some(seed) = &node_value {
                    value.seed(seed);
                }
                MonitorItem::Value(value)
            }
            ItemKind::Command => MonitorItem::Command(super::command::CommandItem::new(&path)),
            ItemKind::Image => MonitorItem::Image(ImageItem::new(&path)),
            ItemKind::Fesa(_) | ItemKind::Root(_) => {
                let master = match &node_master {
                    Some(reference) => Some(resolve_master_name(&path, reference)?),
                    None => None,
                };
                MonitorItem::Object(ObjectItem::new(&path, &class_name, master))
            }
        };
        item.set_rendered(true);
        self.items.insert(path, item);
        Ok(())
    }

    /// Stop displaying and forget an item, aborting whatever it had in flight
    pub fn remove_item(&mut self, path: &str) -> Result<(), ManagerError> {
        let path = normalize_path(path);
        let mut item = self
            .items
            .remove(&path)
            .ok_or_else(|| ManagerError::UnknownItem(path.clone()))?;
        item.clear(&mut self.transport);
        self.routes
            .retain(|_, route| !matches!(route, Route::Item(name) if name == &path));
        self.renderer.item_cleared(&path);
        Ok(())
    }

    /// Expand a collapsed tree entry; a truncated node queues a sub load that
    /// goes out on the next tick
    pub fn expand(&mut self, path: &str) {
        if let Some(TreeOutcome::Grafted(_)) = self.tree.expand(path) {
            self.renderer.hierarchy_updated(self.tree.index());
        }
    }

    /// Invoke a command item with the given argument values
    pub fn execute_command(
        &mut self,
        path: &str,
        args: &[(String, String)],
    ) -> Result<(), ManagerError> {
        let path = normalize_path(path);
        match self.items.get_mut(&path) {
            Some(MonitorItem::Command(command)) => {
                let token = command.execute(&mut self.transport, args)?;
                self.routes.insert(token, Route::Item(path));
                Ok(())
            }
            Some(_) | None => Err(ManagerError::UnknownItem(path)),
        }
    }

    /// Force a fresh hierarchy load on the next tick. Items keep their state;
    /// the periodic checks reconcile them against the new tree
    pub fn reload(&mut self) {
        self.tree.invalidate();
    }

    /// Drop every displayed item, keeping only the tree
    pub fn clear_display(&mut self) {
        let names: Vec<String> = self.items.keys().cloned().collect();
        for name in names {
            if let Some(mut item) = self.items.remove(&name) {
                item.clear(&mut self.transport);
                self.renderer.item_cleared(&name);
            }
        }
        self.routes.retain(|_, route| matches!(route, Route::Tree));
    }

    /// The version the referenced master currently holds a payload for
    fn master_version_of(&self, item_name: &str) -> Option<i64> {
        let master = match self.items.get(item_name) {
            Some(MonitorItem::Object(object)) => object.master.as_deref()?,
            _ => return None,
        };
        match self.items.get(master) {
            Some(MonitorItem::Object(master)) if master.data().is_some() => Some(master.version),
            _ => None,
        }
    }

    fn dispatch(&mut self, token: RequestToken, result: TransportResult) -> Result<(), ManagerError> {
        match self.routes.remove(&token) {
            Some(Route::Tree) => {
                match self.tree.on_response(token, result) {
                    TreeOutcome::Rebuilt | TreeOutcome::Grafted(_) => {
                        self.renderer.hierarchy_updated(self.tree.index());
                    }
                    TreeOutcome::StaleTarget(path) => {
                        log::debug!("Discarded sub load for vanished node {path}");
                    }
                    TreeOutcome::NotReady => (),
                }
                Ok(())
            }
            Some(Route::Item(name)) => self.handle_item_response(name, token, result),
            None => {
                log::debug!("No route for completed request {token:?}");
                Ok(())
            }
        }
    }

    fn handle_item_response(
        &mut self,
        name: String,
        token: RequestToken,
        result: TransportResult,
    ) -> Result<(), ManagerError> {
        let master_version = self.master_version_of(&name);
        let event = match self.items.get_mut(&name) {
            None => {
                log::debug!("Response for removed item {name} dropped");
                return Ok(());
            }
            Some(MonitorItem::Value(item)) => {
                if item.on_response(token, result) {
                    ItemEvent::Value(
                        item.class_name.clone(),
                        String::from(item.value().unwrap_or("")),
                    )
                } else {
                    ItemEvent::None
                }
            }
            Some(MonitorItem::History(item)) => {
                if item.on_response(token, result)? {
                    ItemEvent::History
                } else {
                    ItemEvent::None
                }
            }
            Some(MonitorItem::Object(item)) => {
                match item.on_response(token, result, master_version)? {
                    ObjectOutcome::Decoded => ItemEvent::Object,
                    ObjectOutcome::MasterDecoded => ItemEvent::MasterAdvanced,
                    ObjectOutcome::NeedMaster { master, version } => {
                        ItemEvent::NeedMaster { master, version }
                    }
                    ObjectOutcome::Desync => ItemEvent::Desync,
                    _ => ItemEvent::None,
                }
            }
            Some(MonitorItem::Command(item)) => match item.on_response(token, result)? {
                CommandOutcome::Executed(result) => ItemEvent::Command(result),
                _ => ItemEvent::None,
            },
            Some(MonitorItem::Image(item)) => {
                if item.on_response(token, result) {
                    ItemEvent::Image
                } else {
                    ItemEvent::None
                }
            }
        };
        self.apply_event(&name, event)
    }

    fn apply_event(&mut self, name: &str, event: ItemEvent) -> Result<(), ManagerError> {
        match event {
            ItemEvent::None => (),
            ItemEvent::Value(class_name, value) => {
                self.renderer.value_updated(name, &class_name, &value);
            }
            ItemEvent::History => {
                if let Some(MonitorItem::History(item)) = self.items.get(name) {
                    self.renderer.history_updated(item);
                }
            }
            ItemEvent::Object => {
                if let Some(MonitorItem::Object(item)) = self.items.get(name) {
                    self.renderer.object_updated(item);
                }
            }
            ItemEvent::MasterAdvanced => {
                if let Some(MonitorItem::Object(item)) = self.items.get(name) {
                    self.renderer.object_updated(item);
                }
                // a schema advanced: dependents stuck on it can decode now
                let dependents: Vec<String> = self
                    .items
                    .iter()
                    .filter_map(|(path, item)| match item {
                        MonitorItem::Object(object)
                            if object.master.as_deref() == Some(name) =>
                        {
                            Some(path.clone())
                        }
                        _ => None,
                    })
                    .collect();
                for dependent in dependents {
                    self.check_item(&dependent)?;
                }
            }
            ItemEvent::NeedMaster { master, version } => {
                self.ensure_master(master, version)?;
            }
            ItemEvent::Desync => {
                log::warn!("Item {name} hit a malformed payload; reloading the hierarchy");
                self.tree.invalidate();
            }
            ItemEvent::Command(result) => {
                self.renderer.command_result(name, &result);
            }
            ItemEvent::Image => {
                if let Some(MonitorItem::Image(item)) = self.items.get(name) {
                    self.renderer.image_updated(name, item.data().unwrap_or(&[]));
                }
            }
        }
        Ok(())
    }

    /// Create the schema record on first demand and ask it to serve the
    /// required version
    fn ensure_master(&mut self, master: String, version: i64) -> Result<(), ManagerError> {
        if !self.items.contains_key(&master) {
            let class_name = self
                .tree
                .find(&master)
                .and_then(|node| node.kind.clone())
                .unwrap_or_else(|| String::from("ROOT.TList"));
            self.items.insert(
                master.clone(),
                MonitorItem::Object(ObjectItem::new_master(&master, &class_name)),
            );
        }
        if let Some(MonitorItem::Object(item)) = self.items.get_mut(&master) {
            if let ObjectOutcome::Requested(token) =
                item.ensure_version(&mut self.transport, version)?
            {
                self.routes.insert(token, Route::Item(master));
            }
        }
        Ok(())
    }

    fn check_item(&mut self, name: &str) -> Result<(), ManagerError> {
        let master_version = self.master_version_of(name);
        let event = match self.items.get_mut(name) {
            None => return Ok(()),
            Some(MonitorItem::Value(item)) => {
                if let Some(token) = item.regular_check(&mut self.transport, self.monitoring) {
                    self.routes.insert(token, Route::Item(String::from(name)));
                }
                ItemEvent::None
            }
            Some(MonitorItem::History(item)) => {
                if let Some(token) = item.regular_check(&mut self.transport, self.monitoring) {
                    self.routes.insert(token, Route::Item(String::from(name)));
                }
                ItemEvent::None
            }
            Some(MonitorItem::Image(item)) => {
                if let Some(token) = item.regular_check(&mut self.transport, self.monitoring) {
                    self.routes.insert(token, Route::Item(String::from(name)));
                }
                ItemEvent::None
            }
            Some(MonitorItem::Command(item)) => {
                if let Some(token) = item.regular_check(&mut self.transport) {
                    self.routes.insert(token, Route::Item(String::from(name)));
                }
                ItemEvent::None
            }
            Some(MonitorItem::Object(item)) => {
                match item.regular_check(&mut self.transport, self.monitoring, master_version)? {
                    ObjectOutcome::Requested(token) => {
                        self.routes.insert(token, Route::Item(String::from(name)));
                        ItemEvent::None
                    }
                    // deferred decode completed on this tick
                    ObjectOutcome::Decoded => ItemEvent::Object,
                    _ => ItemEvent::None,
                }
            }
        };
        self.apply_event(name, event)
    }
}
