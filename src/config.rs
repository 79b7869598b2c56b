use crate::overlay::{Mode, MIN_FONT_SIZE};
use anyhow::{anyhow, bail, Context, Result};
use eframe::egui;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Raw on-disk configuration. Every field has a default so a partial
/// file (or none at all) still loads.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct Config {
    /// Substring matched case-insensitively against window titles.
    pub window_title: String,
    /// Pipeline cadence, e.g. "500ms" or "2s".
    pub refresh_rate: String,
    /// Words with OCR confidence below this are dropped. 0.0..=1.0.
    pub confidence_threshold: f32,
    /// "deepl" or "local".
    pub translator: String,
    pub deepl_auth_key: String,
    pub local_server_url: String,
    pub vision_api_key: String,
    /// ISO 639-1 code (or a full language name).
    pub target_language: String,
    pub font_size: f32,
    /// "#RRGGBB" or "#RRGGBBAA".
    pub font_color: String,
    pub background_color: String,
    /// Startup mode: "off", "banner" or "inplace".
    pub overlay_mode: String,
    /// Action name -> key name overrides, e.g. {"quit": "Escape"}.
    pub hotkeys: HashMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            window_title: "RetroArch".to_string(),
            refresh_rate: "2s".to_string(),
            confidence_threshold: 0.6,
            translator: "deepl".to_string(),
            deepl_auth_key: String::new(),
            local_server_url: "http://localhost:14366/".to_string(),
            vision_api_key: String::new(),
            target_language: "en".to_string(),
            font_size: 24.0,
            font_color: "#FFFFFF".to_string(),
            background_color: "#000000B0".to_string(),
            overlay_mode: "banner".to_string(),
            hotkeys: HashMap::new(),
        }
    }
}

/// Validated, ready-to-use settings built from a `Config`.
#[derive(Clone, Debug)]
pub struct Settings {
    pub window_title: String,
    pub refresh_rate: Duration,
    pub confidence_threshold: f32,
    pub translator: TranslatorKind,
    pub deepl_auth_key: String,
    pub local_server_url: String,
    pub vision_api_key: String,
    /// Uppercased ISO 639-1 code, the form DeepL expects.
    pub target_language: String,
    pub font_size: f32,
    pub font_color: egui::Color32,
    pub background_color: egui::Color32,
    pub mode: Mode,
    pub hotkeys: HotkeyBindings,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TranslatorKind {
    DeepL,
    LocalServer,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HotkeyBindings {
    pub switch_mode: egui::Key,
    pub toggle_overlay: egui::Key,
    pub font_increase: egui::Key,
    pub font_decrease: egui::Key,
    pub quit: egui::Key,
}

impl Default for HotkeyBindings {
    fn default() -> Self {
        Self {
            switch_mode: egui::Key::M,
            toggle_overlay: egui::Key::T,
            font_increase: egui::Key::Equals,
            font_decrease: egui::Key::Minus,
            quit: egui::Key::Q,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<Settings> {
        let refresh_rate = parse_duration(&self.refresh_rate)
            .with_context(|| format!("invalid refresh_rate {:?}", self.refresh_rate))?;
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            bail!(
                "confidence_threshold {} is outside 0.0..=1.0",
                self.confidence_threshold
            );
        }
        let translator = match self.translator.to_lowercase().as_str() {
            "deepl" => TranslatorKind::DeepL,
            "local" | "local-server" => TranslatorKind::LocalServer,
            other => bail!("unknown translator {other:?} (expected \"deepl\" or \"local\")"),
        };
        let target_language = resolve_language(&self.target_language)?;
        if self.font_size < MIN_FONT_SIZE {
            bail!(
                "font_size {} is below the minimum of {MIN_FONT_SIZE}",
                self.font_size
            );
        }
        let font_color = parse_color(&self.font_color)
            .with_context(|| format!("invalid font_color {:?}", self.font_color))?;
        let background_color = parse_color(&self.background_color)
            .with_context(|| format!("invalid background_color {:?}", self.background_color))?;
        let mode = parse_mode(&self.overlay_mode)?;
        let hotkeys = resolve_hotkeys(&self.hotkeys)?;

        Ok(Settings {
            window_title: self.window_title.clone(),
            refresh_rate,
            confidence_threshold: self.confidence_threshold,
            translator,
            deepl_auth_key: self.deepl_auth_key.clone(),
            local_server_url: self.local_server_url.clone(),
            vision_api_key: self.vision_api_key.clone(),
            target_language,
            font_size: self.font_size,
            font_color,
            background_color,
            mode,
            hotkeys,
        })
    }
}

pub fn get_config_path() -> PathBuf {
    let config_dir = dirs::config_dir()
        .unwrap_or_default()
        .join("screen-interpreter");
    let _ = std::fs::create_dir_all(&config_dir);
    config_dir.join("config.json")
}

/// Loads the config file, or writes and returns the defaults on first
/// run. An explicitly given path must exist; a malformed file is a
/// fatal error rather than silently ignored.
pub fn load_config(explicit_path: Option<&Path>) -> Result<Config> {
    let path = match explicit_path {
        Some(p) => p.to_path_buf(),
        None => get_config_path(),
    };
    if path.exists() {
        let data = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&data).with_context(|| format!("parsing config {}", path.display()))
    } else if explicit_path.is_some() {
        Err(anyhow!("config file {} does not exist", path.display()))
    } else {
        let config = Config::default();
        save_config(&config, &path)?;
        Ok(config)
    }
}

pub fn save_config(config: &Config, path: &Path) -> Result<()> {
    let data = serde_json::to_string_pretty(config)?;
    std::fs::write(path, data).with_context(|| format!("writing config {}", path.display()))
}

/// "500ms", "2s", "1m", or a bare number of seconds.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    let (number, scale_ms) = if let Some(n) = s.strip_suffix("ms") {
        (n, 1.0)
    } else if let Some(n) = s.strip_suffix('s') {
        (n, 1000.0)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 60_000.0)
    } else {
        (s, 1000.0)
    };
    let value: f64 = number.trim().parse().map_err(|_| anyhow!("not a number"))?;
    if value <= 0.0 {
        bail!("duration must be positive");
    }
    Ok(Duration::from_millis((value * scale_ms) as u64))
}

/// "#RRGGBB" or "#RRGGBBAA".
pub fn parse_color(s: &str) -> Result<egui::Color32> {
    let hex = s.strip_prefix('#').ok_or_else(|| anyhow!("missing '#'"))?;
    if !hex.is_ascii() {
        bail!("non-hex characters");
    }
    let byte = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| anyhow!("bad hex"));
    match hex.len() {
        6 => Ok(egui::Color32::from_rgb(byte(0)?, byte(2)?, byte(4)?)),
        8 => Ok(egui::Color32::from_rgba_unmultiplied(
            byte(0)?,
            byte(2)?,
            byte(4)?,
            byte(6)?,
        )),
        _ => bail!("expected 6 or 8 hex digits"),
    }
}

fn parse_mode(s: &str) -> Result<Mode> {
    match s.to_lowercase().as_str() {
        "off" => Ok(Mode::Off),
        "banner" => Ok(Mode::Banner),
        "inplace" => Ok(Mode::Inplace),
        other => bail!("unknown overlay_mode {other:?} (expected \"off\", \"banner\" or \"inplace\")"),
    }
}

/// Accepts a 639-1 code ("ja") or a full English name ("Japanese") and
/// returns the uppercased 639-1 code.
fn resolve_language(s: &str) -> Result<String> {
    let lang = isolang::Language::from_639_1(&s.to_lowercase())
        .or_else(|| isolang::Language::from_name(s))
        .ok_or_else(|| anyhow!("unknown target_language {s:?}"))?;
    let code = lang
        .to_639_1()
        .ok_or_else(|| anyhow!("language {:?} has no ISO 639-1 code", lang.to_name()))?;
    Ok(code.to_uppercase())
}

fn parse_key(name: &str) -> Result<egui::Key> {
    let key = match name {
        "=" | "+" => Some(egui::Key::Equals),
        "-" | "_" => Some(egui::Key::Minus),
        _ => egui::Key::from_name(name).or_else(|| {
            let mut upper = name.to_string();
            if let Some(first) = upper.get_mut(0..1) {
                first.make_ascii_uppercase();
            }
            egui::Key::from_name(&upper)
        }),
    };
    key.ok_or_else(|| anyhow!("unknown key {name:?}"))
}

fn resolve_hotkeys(overrides: &HashMap<String, String>) -> Result<HotkeyBindings> {
    let mut bindings = HotkeyBindings::default();
    for (action, key_name) in overrides {
        let key = parse_key(key_name).with_context(|| format!("hotkey for {action:?}"))?;
        match action.as_str() {
            "switch_mode" => bindings.switch_mode = key,
            "toggle_overlay" => bindings.toggle_overlay = key,
            "font_increase" => bindings.font_increase = key,
            "font_decrease" => bindings.font_decrease = key,
            "quit" => bindings.quit = key,
            other => bail!("unknown hotkey action {other:?}"),
        }
    }
    Ok(bindings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let settings = Config::default().validate().unwrap();
        assert_eq!(settings.window_title, "RetroArch");
        assert_eq!(settings.refresh_rate, Duration::from_secs(2));
        assert_eq!(settings.mode, Mode::Banner);
        assert_eq!(settings.target_language, "EN");
        assert_eq!(settings.hotkeys, HotkeyBindings::default());
    }

    #[test]
    fn durations_accept_ms_and_seconds() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
        assert!(parse_duration("fast").is_err());
        assert!(parse_duration("0s").is_err());
    }

    #[test]
    fn colors_parse_with_and_without_alpha() {
        assert_eq!(
            parse_color("#FFFFFF").unwrap(),
            egui::Color32::from_rgb(255, 255, 255)
        );
        assert_eq!(
            parse_color("#000000B0").unwrap(),
            egui::Color32::from_rgba_unmultiplied(0, 0, 0, 0xB0)
        );
        assert!(parse_color("FFFFFF").is_err());
        assert!(parse_color("#12345").is_err());
        assert!(parse_color("#GGGGGG").is_err());
        // Multibyte input must error, not panic on a byte-index slice.
        assert!(parse_color("#€€").is_err());
        assert!(parse_color("#ＦＦＦＦＦＦ").is_err());
    }

    #[test]
    fn bad_threshold_is_fatal() {
        let config = Config {
            confidence_threshold: 1.5,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn languages_resolve_from_code_or_name() {
        assert_eq!(resolve_language("ja").unwrap(), "JA");
        assert_eq!(resolve_language("Japanese").unwrap(), "JA");
        assert!(resolve_language("klingon").is_err());
    }

    #[test]
    fn hotkey_overrides_apply() {
        let mut overrides = HashMap::new();
        overrides.insert("quit".to_string(), "Escape".to_string());
        overrides.insert("font_increase".to_string(), "=".to_string());
        let bindings = resolve_hotkeys(&overrides).unwrap();
        assert_eq!(bindings.quit, egui::Key::Escape);
        assert_eq!(bindings.font_increase, egui::Key::Equals);
        assert_eq!(bindings.switch_mode, egui::Key::M);

        let mut bad = HashMap::new();
        bad.insert("teleport".to_string(), "T".to_string());
        assert!(resolve_hotkeys(&bad).is_err());
    }

    #[test]
    fn unknown_translator_is_fatal() {
        let config = Config {
            translator: "babelfish".to_string(),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_file_fills_defaults() {
        let config: Config = serde_json::from_str(r#"{"window_title": "Dolphin"}"#).unwrap();
        assert_eq!(config.window_title, "Dolphin");
        assert_eq!(config.refresh_rate, "2s");
    }
}
