//! Read-only JSON configuration with dotted-path lookup.
//!
//! The config surface stays weakly typed (`serde_json::Value`); typed
//! components convert at their own boundaries. String lookups fall back
//! to an environment variable derived from the key: `claude.api_key`
//! falls back to `CLAUDE_API_KEY`.

use std::path::Path;

use serde_json::Value;

/// Read-only configuration tree backed by JSON.
#[derive(Debug, Clone, Default)]
pub struct Config {
    data: Value,
}

static NULL: Value = Value::Null;

impl Config {
    /// Empty configuration (every lookup yields the default).
    pub fn empty() -> Self {
        Self {
            data: Value::Object(Default::default()),
        }
    }

    /// Wrap an already-parsed JSON value.
    pub fn from_value(data: Value) -> Self {
        Self { data }
    }

    /// Load configuration from a JSON file.
    pub fn load_file(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::load_str(&text)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Load configuration from a JSON string.
    pub fn load_str(json: &str) -> serde_json::Result<Self> {
        Ok(Self {
            data: serde_json::from_str(json)?,
        })
    }

    /// Resolve a dotted path to a node in the tree, if present.
    fn lookup(&self, key: &str) -> Option<&Value> {
        let mut node = &self.data;
        for part in key.split('.') {
            node = node.as_object()?.get(part)?;
        }
        Some(node)
    }

    /// Environment variable name for a dotted key: uppercased, dots
    /// replaced with underscores.
    fn env_key(key: &str) -> String {
        key.replace('.', "_").to_uppercase()
    }

    /// String value at `key`, falling back to the derived environment
    /// variable and then to `def`.
    pub fn get_str(&self, key: &str, def: &str) -> String {
        if let Some(s) = self.lookup(key).and_then(Value::as_str) {
            if !s.is_empty() {
                return s.to_string();
            }
        }
        if let Ok(v) = std::env::var(Self::env_key(key)) {
            if !v.is_empty() {
                return v;
            }
        }
        def.to_string()
    }

    /// Integer value at `key`, or `def`.
    pub fn get_i64(&self, key: &str, def: i64) -> i64 {
        self.lookup(key).and_then(Value::as_i64).unwrap_or(def)
    }

    /// Boolean value at `key`, or `def`.
    pub fn get_bool(&self, key: &str, def: bool) -> bool {
        self.lookup(key).and_then(Value::as_bool).unwrap_or(def)
    }

    /// Float value at `key`, or `def`.
    pub fn get_f64(&self, key: &str, def: f64) -> f64 {
        self.lookup(key).and_then(Value::as_f64).unwrap_or(def)
    }

    /// Subsection at `key`; `Value::Null` when absent.
    pub fn get_section(&self, key: &str) -> &Value {
        self.lookup(key).unwrap_or(&NULL)
    }

    /// Channel-scoped string lookup: `<channel>.<key>`.
    pub fn get_channel_str(&self, channel: &str, key: &str, def: &str) -> String {
        self.get_str(&format!("{channel}.{key}"), def)
    }

    /// The raw configuration tree.
    pub fn data(&self) -> &Value {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Config {
        Config::load_str(
            r#"{
                "bot": {"app_name": "skein", "app_version": "0.3.0"},
                "telegram": {"bot_token": "123:abc", "enabled": true},
                "workers": 4,
                "memory_min_score": 0.25,
                "plugins": ["telegram", "claude"]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn dotted_string_lookup() {
        let cfg = sample();
        assert_eq!(cfg.get_str("bot.app_name", ""), "skein");
        assert_eq!(cfg.get_str("bot.missing", "fallback"), "fallback");
    }

    #[test]
    fn int_bool_float_lookup() {
        let cfg = sample();
        assert_eq!(cfg.get_i64("workers", 2), 4);
        assert_eq!(cfg.get_i64("absent", 2), 2);
        assert!(cfg.get_bool("telegram.enabled", false));
        assert!((cfg.get_f64("memory_min_score", 0.1) - 0.25).abs() < 1e-9);
    }

    #[test]
    fn section_lookup() {
        let cfg = sample();
        assert!(cfg.get_section("telegram").is_object());
        assert!(cfg.get_section("nope").is_null());
        assert!(cfg.get_section("plugins").is_array());
    }

    #[test]
    fn channel_scoped_lookup() {
        let cfg = sample();
        assert_eq!(cfg.get_channel_str("telegram", "bot_token", ""), "123:abc");
    }

    #[test]
    fn env_fallback() {
        let cfg = Config::empty();
        std::env::set_var("SKEINTEST_API_KEY", "from-env");
        assert_eq!(cfg.get_str("skeintest.api_key", ""), "from-env");
        std::env::remove_var("SKEINTEST_API_KEY");
        assert_eq!(cfg.get_str("skeintest.api_key", "dflt"), "dflt");
    }

    #[test]
    fn empty_string_in_config_falls_through() {
        let cfg = Config::load_str(r#"{"claude": {"api_key": ""}}"#).unwrap();
        assert_eq!(cfg.get_str("claude.api_key", "none"), "none");
    }

    #[test]
    fn load_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"workers": 8}"#).unwrap();
        let cfg = Config::load_file(&path).unwrap();
        assert_eq!(cfg.get_i64("workers", 0), 8);
    }

    #[test]
    fn load_file_rejects_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{nope").unwrap();
        assert!(Config::load_file(&path).is_err());
    }
}
