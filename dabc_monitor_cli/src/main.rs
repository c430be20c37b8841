use clap::{Arg, ArgAction, Command};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use libdabc_monitor::command::CommandResult;
use libdabc_monitor::config::MonitorConfig;
use libdabc_monitor::history::HistoryItem;
use libdabc_monitor::manager::Manager;
use libdabc_monitor::object::ObjectItem;
use libdabc_monitor::render::Renderer;
use libdabc_monitor::transport::HttpTransport;
use libdabc_monitor::tree::RenderedEntry;

/// Renderer for headless use: everything that changes goes to the log
struct LogRenderer;

impl Renderer for LogRenderer {
    fn hierarchy_updated(&mut self, index: &[RenderedEntry]) {
        log::info!("Hierarchy updated: {} entries shown", index.len());
    }

    fn value_updated(&mut self, name: &str, _class_name: &str, value: &str) {
        log::info!("{name} = {value}");
    }

    fn history_updated(&mut self, item: &HistoryItem) {
        let series = item.extract_series("value");
        log::info!(
            "{}: {} history entries, latest = {}",
            item.name,
            item.history_len(),
            series.last().map(String::as_str).unwrap_or("<none>")
        );
    }

    fn object_updated(&mut self, item: &ObjectItem) {
        log::info!(
            "{}: {} object at version {} ({} bytes)",
            item.name,
            item.class_name,
            item.version,
            item.data().map(<[u8]>::len).unwrap_or(0)
        );
    }

    fn image_updated(&mut self, name: &str, data: &[u8]) {
        log::info!("{name}: image updated ({} bytes)", data.len());
    }

    fn command_result(&mut self, name: &str, result: &CommandResult) {
        if result.success {
            log::info!("{name}: command succeeded");
        } else {
            log::warn!("{name}: command failed: {}", result.document);
        }
    }

    fn item_cleared(&mut self, name: &str) {
        log::info!("{name}: cleared");
    }
}

fn make_template_config(path: &Path) {
    let config = MonitorConfig::default();
    let yaml_str = serde_yaml::to_string(&config).unwrap();
    let mut file = File::create(path).expect("Could create template config file!");
    file.write_all(yaml_str.as_bytes())
        .expect("Failed to write yaml data to file!");
}

fn main() {
    // Create a cli
    let matches = Command::new("dabc_monitor_cli")
        .arg_required_else_help(true)
        .subcommand(Command::new("new").about("Make a template configuration yaml file"))
        .arg(
            Arg::new("path")
                .short('p')
                .long("path")
                .help("Path to the config file"),
        )
        .arg(
            Arg::new("item")
                .short('i')
                .long("item")
                .action(ArgAction::Append)
                .help("Item path to display; may be given multiple times"),
        )
        .get_matches();

    // Initialize feedback
    simplelog::TermLogger::init(
        simplelog::LevelFilter::Info,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )
    .expect("Could not create logging!");

    // Parse the cli
    let config_path = PathBuf::from(matches.get_one::<String>("path").expect("We require args"));

    if let Some(("new", _)) = matches.subcommand() {
        log::info!(
            "Making a template config at {}...",
            config_path.to_string_lossy()
        );
        make_template_config(&config_path);
        log::info!("Done.");
        return;
    }

    // Load our config
    log::info!("Loading config from {}...", config_path.to_string_lossy());
    let config = match MonitorConfig::read_config_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            log::error!("{e}");
            return;
        }
    };
    if let Err(e) = config.validate() {
        log::error!("{e}");
        return;
    }
    log::info!("Config successfully loaded.");
    log::info!("Server URL: {}", config.server_url);
    log::info!("Poll Interval: {} ms", config.poll_interval_ms);
    log::info!("History Limit: {}", config.history_limit);
    log::info!("Monitoring: {}", config.monitoring);

    let requested: Vec<String> = matches
        .get_many::<String>("item")
        .map(|items| items.cloned().collect())
        .unwrap_or_default();

    let transport = HttpTransport::new(&config.server_url, config.n_workers);
    let interval = std::time::Duration::from_millis(config.poll_interval_ms);
    let mut manager = Manager::new(config, transport, LogRenderer);

    let mut displayed = false;
    loop {
        if let Err(e) = manager.tick() {
            log::error!("Monitor tick failed with error: {e}");
        }

        // once the hierarchy is in, pick the items to follow: the requested
        // paths, or every rate/log entry currently shown
        if !displayed && manager.tree().ready {
            let paths: Vec<String> = if requested.is_empty() {
                manager
                    .tree()
                    .index()
                    .iter()
                    .filter(|entry| matches!(entry.kind.as_deref(), Some("rate") | Some("log")))
                    .map(|entry| entry.path.clone())
                    .collect()
            } else {
                requested.clone()
            };
            for path in paths {
                match manager.display_item(&path) {
                    Ok(()) => log::info!("Displaying {path}"),
                    Err(e) => log::error!("{e}"),
                }
            }
            displayed = true;
        }

        std::thread::sleep(interval);
    }
}
