use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;

use log::{info, warn};

const CONFIG_PATH: &str = "beatline.ini";

// --- Minimal INI reader ---
#[derive(Debug, Default)]
struct SimpleIni {
    // Keyed by "section.key", both lowercased.
    entries: HashMap<String, String>,
}

impl SimpleIni {
    fn load<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        let mut ini = SimpleIni::default();
        let mut section = String::new();

        for raw_line in content.lines() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }
            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                section = name.trim().to_lowercase();
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim();
                if !key.is_empty() {
                    ini.entries.insert(
                        format!("{section}.{}", key.to_lowercase()),
                        value.trim().to_string(),
                    );
                }
            }
        }
        Ok(ini)
    }

    fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.entries
            .get(&format!("{section}.{key}"))
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub const fn as_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }

    const fn as_str(self) -> &'static str {
        match self {
            LogLevel::Off => "Off",
            LogLevel::Error => "Error",
            LogLevel::Warn => "Warn",
            LogLevel::Info => "Info",
            LogLevel::Debug => "Debug",
            LogLevel::Trace => "Trace",
        }
    }
}

impl FromStr for LogLevel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "off" => Ok(LogLevel::Off),
            "error" => Ok(LogLevel::Error),
            "warn" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub lanes: usize,
    pub visible_fragments: usize,
    // Tick interval used when a chart cannot supply one.
    pub fallback_ms_per_fragment: u32,
    // Mod registry entry to activate; empty means none.
    pub active_mod: String,
    pub log_level: LogLevel,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            lanes: 8,
            visible_fragments: 10,
            fallback_ms_per_fragment: 200,
            active_mod: String::new(),
            log_level: LogLevel::Warn,
        }
    }
}

static CONFIG: std::sync::LazyLock<Mutex<Config>> =
    std::sync::LazyLock::new(|| Mutex::new(Config::default()));

fn create_default_config_file() -> Result<(), std::io::Error> {
    info!("'{CONFIG_PATH}' not found, creating with default values.");
    let default = Config::default();

    let mut content = String::new();
    content.push_str("[Game]\n");
    content.push_str(&format!("Lanes={}\n", default.lanes));
    content.push_str(&format!("VisibleFragments={}\n", default.visible_fragments));
    content.push_str(&format!(
        "FallbackMsPerFragment={}\n",
        default.fallback_ms_per_fragment
    ));
    content.push_str(&format!("Mod={}\n", default.active_mod));
    content.push_str("\n[Log]\n");
    content.push_str(&format!("Level={}\n", default.log_level.as_str()));

    std::fs::write(CONFIG_PATH, content)
}

pub fn load() {
    if !Path::new(CONFIG_PATH).exists() {
        if let Err(e) = create_default_config_file() {
            warn!("could not create '{CONFIG_PATH}': {e}");
            return;
        }
    }

    let ini = match SimpleIni::load(CONFIG_PATH) {
        Ok(ini) => ini,
        Err(e) => {
            warn!("could not read '{CONFIG_PATH}': {e}; using defaults");
            return;
        }
    };

    let mut config = CONFIG.lock().unwrap();
    parse_into(&mut config, &ini);
}

fn parse_into(config: &mut Config, ini: &SimpleIni) {
    if let Some(v) = ini.get("game", "lanes") {
        match v.parse::<usize>() {
            Ok(n) if n > 0 => config.lanes = n,
            _ => warn!("ignoring bad Lanes value '{v}'"),
        }
    }
    if let Some(v) = ini.get("game", "visiblefragments") {
        match v.parse::<usize>() {
            Ok(n) if n >= 2 => config.visible_fragments = n,
            _ => warn!("ignoring bad VisibleFragments value '{v}'"),
        }
    }
    if let Some(v) = ini.get("game", "fallbackmsperfragment") {
        match v.parse::<u32>() {
            Ok(n) if n > 0 => config.fallback_ms_per_fragment = n,
            _ => warn!("ignoring bad FallbackMsPerFragment value '{v}'"),
        }
    }
    if let Some(v) = ini.get("game", "mod") {
        config.active_mod = v.to_string();
    }
    if let Some(v) = ini.get("log", "level") {
        match v.parse::<LogLevel>() {
            Ok(level) => config.log_level = level,
            Err(()) => warn!("ignoring bad log Level value '{v}'"),
        }
    }
}

pub fn get() -> Config {
    CONFIG.lock().unwrap().clone()
}
