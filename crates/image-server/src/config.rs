use crate::error::{Result, ServerError};
use image_engine::{EngineOptions, ParamMap, ParamResolver};
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

/// Server configuration parsed from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub source_dir: PathBuf,
    pub cache_dir: PathBuf,
    /// Signing is disabled when unset or empty
    pub sign_key: Option<String>,
    pub route_prefix: String,
    pub max_image_size: Option<u64>,
    pub defaults: ParamMap,
    pub presets: HashMap<String, ParamMap>,
    pub cache_with_file_extensions: bool,
    pub generation_lock: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3005,
            source_dir: PathBuf::from("./storage/source"),
            cache_dir: PathBuf::from("./storage/cache"),
            sign_key: None,
            route_prefix: "/img".to_string(),
            max_image_size: None,
            defaults: ParamMap::new(),
            presets: HashMap::new(),
            cache_with_file_extensions: false,
            generation_lock: true,
        }
    }
}

impl Config {
    /// Parse configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Config::default();

        let port = lookup("PORT")
            .and_then(|p| p.parse().ok())
            .unwrap_or(defaults.port);

        let source_dir = lookup("SOURCE_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.source_dir);

        let cache_dir = lookup("CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.cache_dir);

        let sign_key = lookup("SIGN_KEY").filter(|k| !k.is_empty());

        let route_prefix = lookup("ROUTE_PREFIX").unwrap_or(defaults.route_prefix);

        let max_image_size = lookup("MAX_IMAGE_SIZE").and_then(|s| s.parse::<u64>().ok());

        let param_defaults = match lookup("IMAGE_DEFAULTS") {
            Some(raw) => parse_param_map("IMAGE_DEFAULTS", &json(&raw, "IMAGE_DEFAULTS")?)?,
            None => ParamMap::new(),
        };

        let presets = match lookup("IMAGE_PRESETS") {
            Some(raw) => parse_presets(&json(&raw, "IMAGE_PRESETS")?)?,
            None => HashMap::new(),
        };

        let cache_with_file_extensions = lookup("CACHE_WITH_FILE_EXTENSIONS")
            .and_then(|v| parse_bool(&v))
            .unwrap_or(defaults.cache_with_file_extensions);

        let generation_lock = lookup("GENERATION_LOCK")
            .and_then(|v| parse_bool(&v))
            .unwrap_or(defaults.generation_lock);

        Ok(Self {
            port,
            source_dir,
            cache_dir,
            sign_key,
            route_prefix,
            max_image_size,
            defaults: param_defaults,
            presets,
            cache_with_file_extensions,
            generation_lock,
        })
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            max_image_size: self.max_image_size,
            cache_with_file_extensions: self.cache_with_file_extensions,
            resolver: ParamResolver::new(self.defaults.clone(), self.presets.clone()),
        }
    }
}

fn json(raw: &str, name: &str) -> Result<serde_json::Value> {
    serde_json::from_str(raw)
        .map_err(|e| ServerError::Config(format!("{} is not valid JSON: {}", name, e)))
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// `{"w": 200, "fit": "crop"}` → params. Scalars are stringified.
fn parse_param_map(name: &str, value: &serde_json::Value) -> Result<ParamMap> {
    let object = value
        .as_object()
        .ok_or_else(|| ServerError::Config(format!("{} is not a JSON object", name)))?;

    object
        .iter()
        .map(|(k, v)| {
            let v = match v {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Number(n) => n.to_string(),
                serde_json::Value::Bool(b) => b.to_string(),
                _ => {
                    return Err(ServerError::Config(format!(
                        "{}.{} must be a string, number or boolean",
                        name, k
                    )))
                }
            };
            Ok((k.clone(), v))
        })
        .collect()
}

fn parse_presets(value: &serde_json::Value) -> Result<HashMap<String, ParamMap>> {
    let object = value
        .as_object()
        .ok_or_else(|| ServerError::Config("IMAGE_PRESETS is not a JSON object".to_string()))?;

    object
        .iter()
        .map(|(preset, params)| {
            let name = format!("IMAGE_PRESETS.{}", preset);
            Ok((preset.clone(), parse_param_map(&name, params)?))
        })
        .collect()
}
