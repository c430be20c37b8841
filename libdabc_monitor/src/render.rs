use super::command::CommandResult;
use super::history::HistoryItem;
use super::object::ObjectItem;
use super::tree::RenderedEntry;

/// Presentation seam. The monitor core calls these hooks whenever something
/// visible changed; implementations draw, log, or ignore as they see fit
pub trait Renderer {
    /// The rendered hierarchy index was rebuilt or grafted
    fn hierarchy_updated(&mut self, index: &[RenderedEntry]);
    /// A simple value item has a new reading
    fn value_updated(&mut self, name: &str, class_name: &str, value: &str);
    /// A history item merged new entries or advanced its version
    fn history_updated(&mut self, item: &HistoryItem);
    /// An object item decoded a new payload
    fn object_updated(&mut self, item: &ObjectItem);
    /// An image item fetched a new picture
    fn image_updated(&mut self, name: &str, data: &[u8]);
    /// A command execution finished
    fn command_result(&mut self, name: &str, result: &CommandResult);
    /// An item was removed or cleared and should disappear from the display
    fn item_cleared(&mut self, name: &str);
}

/// Renderer that draws nothing. Default for headless use and tests
#[derive(Debug, Default)]
pub struct NullRenderer;

impl Renderer for NullRenderer {
    fn hierarchy_updated(&mut self, _index: &[RenderedEntry]) {}
    fn value_updated(&mut self, _name: &str, _class_name: &str, _value: &str) {}
    fn history_updated(&mut self, _item: &HistoryItem) {}
    fn object_updated(&mut self, _item: &ObjectItem) {}
    fn image_updated(&mut self, _name: &str, _data: &[u8]) {}
    fn command_result(&mut self, _name: &str, _result: &CommandResult) {}
    fn item_cleared(&mut self, _name: &str) {}
}
