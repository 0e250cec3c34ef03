use std::collections::HashMap;
use std::fs;
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::time::Duration;

/// INI-like configuration: `key = value` pairs, `[section]` headers and `#` comments.
/// Keys before the first section header are globals.
#[derive(Debug)]
pub struct Config {
    pub globals: HashMap<String, String>,
    pub sections: HashMap<String, HashMap<String, String>>,
}

impl Config {
    pub fn load(path: &str) -> Result<Self, String> {
        let content =
            fs::read_to_string(path).map_err(|e| format!("Error reading file {path}: {e}"))?;
        Ok(Self::parse(&content))
    }

    /// Tries each path in order and returns the first that loads.
    pub fn load_first(paths: &[&str]) -> Result<Self, String> {
        let mut last_err = String::from("no configuration paths given");
        for p in paths {
            match Self::load(p) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => last_err = e,
            }
        }
        Err(last_err)
    }

    #[must_use]
    pub fn parse(content: &str) -> Self {
        let mut globals = HashMap::new();
        let mut sections: HashMap<String, HashMap<String, String>> = HashMap::new();
        let mut current_section: Option<String> = None;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if line.starts_with('[') && line.ends_with(']') {
                let name = &line[1..line.len() - 1];
                current_section = Some(name.trim().to_string());
                continue;
            }

            if let Some(pos) = line.find('=') {
                let key = line[..pos].trim().to_string();
                let value = line[pos + 1..].trim().trim_matches('"').to_string();

                match &current_section {
                    None => {
                        globals.insert(key, value);
                    }
                    Some(sec) => {
                        sections.entry(sec.clone()).or_default().insert(key, value);
                    }
                }
            }
        }
        Config { globals, sections }
    }

    pub fn empty() -> Self {
        Self {
            globals: HashMap::new(),
            sections: HashMap::new(),
        }
    }

    #[must_use]
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .get(section)
            .and_then(|sec| sec.get(key))
            .map(|s| s.as_str())
    }

    #[must_use]
    pub fn get_non_empty(&self, section: &str, key: &str) -> Option<&str> {
        self.get(section, key).filter(|s| !s.is_empty())
    }

    #[must_use]
    pub fn get_global(&self, key: &str) -> Option<&str> {
        self.globals.get(key).map(|s| s.as_str())
    }

    #[must_use]
    pub fn get_or_default<'a>(&'a self, section: &str, key: &str, default: &'a str) -> &'a str {
        self.get(section, key)
            .or_else(|| self.get_global(key))
            .unwrap_or(default)
    }

    #[must_use]
    pub fn get_non_empty_or_default<'a>(
        &'a self,
        section: &str,
        key: &str,
        default: &'a str,
    ) -> &'a str {
        self.get_non_empty(section, key)
            .or_else(|| self.get_global(key).filter(|s| !s.is_empty()))
            .unwrap_or(default)
    }

    /// Parsed value, or `default` when absent or unparsable.
    #[must_use]
    pub fn get_parsed_or<T: FromStr>(&self, section: &str, key: &str, default: T) -> T {
        self.get_non_empty(section, key)
            .and_then(|s| s.parse().ok())
            .unwrap_or(default)
    }
}

pub const DEFAULT_SCREEN_PIPELINE: &str =
    "ximagesrc use-damage=0 ! videoconvert ! video/x-raw,format=BGR ! appsink drop=true max-buffers=1";

/// Typed media settings read from a [`Config`].
///
/// ```text
/// [Network]  local_ip
/// [Ports]    rtp_port_start, rtp_port_end, scan_window
/// [Audio]    queue_capacity
/// [Video]    fps, width, height, mtu, jpeg_quality, camera_id, screen_pipeline
/// [Streams]  start_timeout_ms
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaSettings {
    pub local_ip: Option<Ipv4Addr>,
    pub rtp_port_start: u16,
    pub rtp_port_end: u16,
    pub scan_window: u16,
    pub queue_capacity: usize,
    pub fps: u32,
    pub width: i32,
    pub height: i32,
    pub mtu: usize,
    pub jpeg_quality: i32,
    pub camera_id: i32,
    pub screen_pipeline: String,
    pub start_timeout: Duration,
}

impl Default for MediaSettings {
    fn default() -> Self {
        Self {
            local_ip: None,
            rtp_port_start: 10_000,
            rtp_port_end: 20_000,
            scan_window: 100,
            queue_capacity: 100,
            fps: 15,
            width: 640,
            height: 480,
            mtu: 1400,
            jpeg_quality: 80,
            camera_id: 0,
            screen_pipeline: DEFAULT_SCREEN_PIPELINE.to_string(),
            start_timeout: Duration::from_secs(10),
        }
    }
}

impl MediaSettings {
    #[must_use]
    pub fn from_config(cfg: &Config) -> Self {
        let d = Self::default();
        Self {
            local_ip: cfg
                .get_non_empty("Network", "local_ip")
                .and_then(|s| s.parse().ok()),
            rtp_port_start: cfg.get_parsed_or("Ports", "rtp_port_start", d.rtp_port_start),
            rtp_port_end: cfg.get_parsed_or("Ports", "rtp_port_end", d.rtp_port_end),
            scan_window: cfg.get_parsed_or("Ports", "scan_window", d.scan_window),
            queue_capacity: cfg
                .get_parsed_or("Audio", "queue_capacity", d.queue_capacity)
                .max(1),
            fps: cfg.get_parsed_or("Video", "fps", d.fps).max(1),
            width: cfg.get_parsed_or("Video", "width", d.width),
            height: cfg.get_parsed_or("Video", "height", d.height),
            mtu: cfg.get_parsed_or("Video", "mtu", d.mtu),
            jpeg_quality: cfg
                .get_parsed_or("Video", "jpeg_quality", d.jpeg_quality)
                .clamp(1, 100),
            camera_id: cfg.get_parsed_or("Video", "camera_id", d.camera_id),
            screen_pipeline: cfg
                .get_non_empty_or_default("Video", "screen_pipeline", DEFAULT_SCREEN_PIPELINE)
                .to_string(),
            start_timeout: Duration::from_millis(cfg.get_parsed_or(
                "Streams",
                "start_timeout_ms",
                u64::try_from(d.start_timeout.as_millis()).unwrap_or(10_000),
            )),
        }
    }

    /// Pause between video frames.
    #[must_use]
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(1000 / u64::from(self.fps.max(1)))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;

    const SAMPLE: &str = r#"
# global
log_filename = media

[Network]
local_ip = 192.168.0.10

[Ports]
rtp_port_start = 30000
scan_window = 40

[Video]
fps = 30
mtu = not-a-number
screen_pipeline = "videotestsrc ! appsink"
"#;

    #[test]
    fn parses_sections_and_globals() {
        let cfg = Config::parse(SAMPLE);
        assert_eq!(cfg.get_global("log_filename"), Some("media"));
        assert_eq!(cfg.get("Ports", "scan_window"), Some("40"));
        assert_eq!(cfg.get("Ports", "missing"), None);
        assert_eq!(cfg.get_or_default("Logging", "log_filename", "x"), "media");
    }

    #[test]
    fn media_settings_use_defaults_for_bad_values() {
        let s = MediaSettings::from_config(&Config::parse(SAMPLE));
        assert_eq!(s.local_ip, Some(Ipv4Addr::new(192, 168, 0, 10)));
        assert_eq!(s.rtp_port_start, 30_000);
        assert_eq!(s.rtp_port_end, 20_000);
        assert_eq!(s.scan_window, 40);
        assert_eq!(s.fps, 30);
        assert_eq!(s.mtu, 1400);
        assert_eq!(s.screen_pipeline, "videotestsrc ! appsink");
        assert_eq!(s.start_timeout, Duration::from_secs(10));
    }

    #[test]
    fn empty_config_gives_defaults() {
        let s = MediaSettings::from_config(&Config::empty());
        assert_eq!(s, MediaSettings::default());
        assert_eq!(s.frame_interval(), Duration::from_millis(66));
    }

    #[test]
    fn load_first_reports_last_error() {
        let err = Config::load_first(&["/nonexistent/a.conf", "/nonexistent/b.conf"]).unwrap_err();
        assert!(err.contains("b.conf"));
    }
}
