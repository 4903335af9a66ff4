//! Transform parameter handling
//!
//! Raw query pairs are filtered against a whitelist, merged with engine
//! defaults and presets, and kept in a sorted map so the same request always
//! yields the same cache key. [`Transform`] is the typed, validated view the
//! processor works from.

use crate::error::{EngineError, Result};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

/// Query keys the engine understands. Anything else is ignored.
pub const ALLOWED_PARAMS: &[&str] = &[
    "w", "h", "fit", "dpr", "or", "bri", "con", "blur", "filt", "q", "fm",
];

/// Query key selecting presets, expanded and then dropped
pub const PRESET_PARAM: &str = "p";

pub const DEFAULT_QUALITY: u8 = 90;

/// Largest output side in pixels, after the pixel ratio
pub const MAX_DIMENSION: u32 = 8192;

pub type ParamMap = BTreeMap<String, String>;

/// Canonical transform parameters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransformParams(ParamMap);

impl TransformParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value if the key is whitelisted. Returns whether it was kept.
    pub fn insert(&mut self, key: &str, value: &str) -> bool {
        if !ALLOWED_PARAMS.contains(&key) {
            return false;
        }
        self.0.insert(key.to_string(), value.to_string());
        true
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl fmt::Display for TransformParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (k, v)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str("&")?;
            }
            write!(f, "{}={}", k, v)?;
        }
        Ok(())
    }
}

/// Expands presets and applies defaults to raw query pairs
#[derive(Debug, Clone, Default)]
pub struct ParamResolver {
    pub defaults: ParamMap,
    pub presets: HashMap<String, ParamMap>,
}

impl ParamResolver {
    pub fn new(defaults: ParamMap, presets: HashMap<String, ParamMap>) -> Self {
        Self { defaults, presets }
    }

    /// Merge order, lowest priority first: defaults, presets named in `p`
    /// (left to right), then the explicit query values.
    pub fn resolve(&self, query: &[(String, String)]) -> TransformParams {
        let mut params = TransformParams::new();

        for (k, v) in &self.defaults {
            params.insert(k, v);
        }

        let preset_names = query
            .iter()
            .filter(|(k, _)| k == PRESET_PARAM)
            .flat_map(|(_, v)| v.split(','))
            .map(str::trim)
            .filter(|name| !name.is_empty());
        for name in preset_names {
            match self.presets.get(name) {
                Some(preset) => {
                    for (k, v) in preset {
                        params.insert(k, v);
                    }
                }
                None => tracing::debug!(preset = name, "Ignoring unknown preset"),
            }
        }

        for (k, v) in query {
            params.insert(k, v);
        }

        params
    }
}

/// Output encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Jpeg,
    Png,
    Gif,
    WebP,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::Gif => "gif",
            Self::WebP => "webp",
        }
    }

    pub fn image_format(&self) -> image::ImageFormat {
        match self {
            Self::Jpeg => image::ImageFormat::Jpeg,
            Self::Png => image::ImageFormat::Png,
            Self::Gif => image::ImageFormat::Gif,
            Self::WebP => image::ImageFormat::WebP,
        }
    }

    /// Encoding used when `fm` is absent: keep the source format if we can
    /// write it, otherwise fall back to JPEG.
    pub fn from_source(format: Option<image::ImageFormat>) -> Self {
        match format {
            Some(image::ImageFormat::Png) => Self::Png,
            Some(image::ImageFormat::Gif) => Self::Gif,
            Some(image::ImageFormat::WebP) => Self::WebP,
            _ => Self::Jpeg,
        }
    }
}

impl FromStr for OutputFormat {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Ok(Self::Jpeg),
            "png" => Ok(Self::Png),
            "gif" => Ok(Self::Gif),
            "webp" => Ok(Self::WebP),
            _ => Err(EngineError::invalid_param(
                "fm",
                format!("unknown format: {}", s),
            )),
        }
    }
}

/// How the image is fitted into the requested box
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Fit {
    /// Fit inside the box, keep aspect ratio
    #[default]
    Contain,
    /// Like `Contain`, but never upscale
    Max,
    /// Contain, then pad to the exact box
    Fill,
    /// Ignore aspect ratio
    Stretch,
    /// Cover the box and crop from the center
    Crop,
}

impl FromStr for Fit {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "contain" => Ok(Self::Contain),
            "max" => Ok(Self::Max),
            "fill" => Ok(Self::Fill),
            "stretch" => Ok(Self::Stretch),
            "crop" => Ok(Self::Crop),
            _ => Err(EngineError::invalid_param(
                "fit",
                format!("unknown fit mode: {}", s),
            )),
        }
    }
}

/// Validated transform, ready for the processor
#[derive(Debug, Clone, PartialEq)]
pub struct Transform {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fit: Fit,
    pub dpr: f32,
    /// Clockwise rotation in degrees: 0, 90, 180 or 270
    pub orientation: u16,
    pub brightness: Option<i32>,
    pub contrast: Option<i32>,
    pub blur: Option<f32>,
    pub greyscale: bool,
    pub quality: u8,
    pub format: Option<OutputFormat>,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            width: None,
            height: None,
            fit: Fit::default(),
            dpr: 1.0,
            orientation: 0,
            brightness: None,
            contrast: None,
            blur: None,
            greyscale: false,
            quality: DEFAULT_QUALITY,
            format: None,
        }
    }
}

impl Transform {
    /// Requested output dimensions after applying the pixel ratio
    pub fn target_size(&self) -> (Option<u32>, Option<u32>) {
        let scale = |v: u32| ((v as f32 * self.dpr).round() as u32).max(1);
        (self.width.map(scale), self.height.map(scale))
    }
}

impl TryFrom<&TransformParams> for Transform {
    type Error = EngineError;

    fn try_from(params: &TransformParams) -> Result<Self> {
        let mut t = Transform::default();

        if let Some(v) = params.get("w") {
            t.width = Some(parse_dimension("w", v)?);
        }
        if let Some(v) = params.get("h") {
            t.height = Some(parse_dimension("h", v)?);
        }
        if let Some(v) = params.get("fit") {
            t.fit = v.parse()?;
        }
        if let Some(v) = params.get("dpr") {
            t.dpr = parse_ranged::<f32>("dpr", v, 1.0, 8.0)?;
        }
        if let Some(v) = params.get("or") {
            t.orientation = match v {
                "0" => 0,
                "90" => 90,
                "180" => 180,
                "270" => 270,
                _ => {
                    return Err(EngineError::invalid_param(
                        "or",
                        "must be one of 0, 90, 180, 270",
                    ))
                }
            };
        }
        if let Some(v) = params.get("bri") {
            t.brightness = Some(parse_ranged::<i32>("bri", v, -100, 100)?);
        }
        if let Some(v) = params.get("con") {
            t.contrast = Some(parse_ranged::<i32>("con", v, -100, 100)?);
        }
        if let Some(v) = params.get("blur") {
            t.blur = Some(parse_ranged::<f32>("blur", v, 0.0, 100.0)?);
        }
        if let Some(v) = params.get("filt") {
            match v {
                "greyscale" => t.greyscale = true,
                _ => {
                    return Err(EngineError::invalid_param(
                        "filt",
                        format!("unknown filter: {}", v),
                    ))
                }
            }
        }
        if let Some(v) = params.get("q") {
            t.quality = parse_ranged::<u8>("q", v, 1, 100)?;
        }
        if let Some(v) = params.get("fm") {
            t.format = Some(v.parse()?);
        }

        let (width, height) = t.target_size();
        for (name, side) in [("w", width), ("h", height)] {
            if side.is_some_and(|v| v > MAX_DIMENSION) {
                return Err(EngineError::invalid_param(
                    name,
                    format!("exceeds {} pixels at dpr {}", MAX_DIMENSION, t.dpr),
                ));
            }
        }

        Ok(t)
    }
}

fn parse_dimension(name: &str, value: &str) -> Result<u32> {
    match value.parse::<u32>() {
        Ok(v) if v > MAX_DIMENSION => Err(EngineError::invalid_param(
            name,
            format!("must be between 1 and {}", MAX_DIMENSION),
        )),
        Ok(v) if v > 0 => Ok(v),
        _ => Err(EngineError::invalid_param(
            name,
            "must be a positive integer",
        )),
    }
}

fn parse_ranged<T>(name: &str, value: &str, min: T, max: T) -> Result<T>
where
    T: FromStr + PartialOrd + fmt::Display + Copy,
{
    let parsed = value
        .parse::<T>()
        .map_err(|_| EngineError::invalid_param(name, format!("not a number: {}", value)))?;
    if !(min..=max).contains(&parsed) {
        return Err(EngineError::invalid_param(
            name,
            format!("must be between {} and {}", min, max),
        ));
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_unknown_keys_and_signature_are_dropped() {
        let params = ParamResolver::default().resolve(&pairs(&[
            ("w", "100"),
            ("s", "deadbeef"),
            ("utm_source", "mail"),
        ]));
        assert_eq!(params.to_string(), "w=100");
    }

    #[test]
    fn test_params_are_sorted() {
        let a = ParamResolver::default().resolve(&pairs(&[("w", "100"), ("h", "50")]));
        let b = ParamResolver::default().resolve(&pairs(&[("h", "50"), ("w", "100")]));
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "h=50&w=100");
    }

    #[test]
    fn test_merge_precedence() {
        let mut defaults = ParamMap::new();
        defaults.insert("q".to_string(), "75".to_string());
        defaults.insert("fm".to_string(), "jpg".to_string());

        let mut small = ParamMap::new();
        small.insert("w".to_string(), "200".to_string());
        small.insert("q".to_string(), "60".to_string());
        let mut square = ParamMap::new();
        square.insert("h".to_string(), "200".to_string());
        square.insert("fit".to_string(), "crop".to_string());

        let mut presets = HashMap::new();
        presets.insert("small".to_string(), small);
        presets.insert("square".to_string(), square);

        let resolver = ParamResolver::new(defaults, presets);
        let params = resolver.resolve(&pairs(&[("p", "small, square,missing"), ("w", "300")]));

        assert_eq!(params.get("w"), Some("300"));
        assert_eq!(params.get("h"), Some("200"));
        assert_eq!(params.get("q"), Some("60"));
        assert_eq!(params.get("fm"), Some("jpg"));
        assert_eq!(params.get("fit"), Some("crop"));
        assert_eq!(params.get("p"), None);
    }

    #[test]
    fn test_transform_parsing() {
        let params =
            ParamResolver::default().resolve(&pairs(&[
                ("w", "100"),
                ("dpr", "2"),
                ("fit", "crop"),
                ("fm", "png"),
                ("or", "90"),
                ("filt", "greyscale"),
            ]));
        let t = Transform::try_from(&params).unwrap();

        assert_eq!(t.width, Some(100));
        assert_eq!(t.height, None);
        assert_eq!(t.fit, Fit::Crop);
        assert_eq!(t.format, Some(OutputFormat::Png));
        assert_eq!(t.orientation, 90);
        assert!(t.greyscale);
        assert_eq!(t.quality, DEFAULT_QUALITY);
        assert_eq!(t.target_size(), (Some(200), None));
    }

    #[test]
    fn test_pixel_ratio_cannot_push_past_max_dimension() {
        let params = ParamResolver::default().resolve(&pairs(&[("w", "5000"), ("dpr", "2")]));
        let err = Transform::try_from(&params).unwrap_err();
        assert!(err.to_string().contains("'w'"), "{}", err);

        let params = ParamResolver::default().resolve(&pairs(&[("h", "4096"), ("dpr", "2")]));
        assert_eq!(
            Transform::try_from(&params).unwrap().target_size(),
            (None, Some(8192))
        );
    }

    #[test]
    fn test_transform_rejects_bad_values() {
        for (k, v) in [
            ("w", "0"),
            ("w", "-5"),
            ("h", "abc"),
            ("q", "101"),
            ("dpr", "9"),
            ("dpr", "NaN"),
            ("blur", "NaN"),
            ("w", "8193"),
            ("h", "4000000000"),
            ("bri", "-101"),
            ("fit", "squish"),
            ("fm", "bmp"),
            ("or", "45"),
            ("filt", "sepia"),
        ] {
            let params = ParamResolver::default().resolve(&pairs(&[(k, v)]));
            let err = Transform::try_from(&params).unwrap_err();
            assert!(
                err.to_string().contains(&format!("'{}'", k)),
                "{}={} gave {}",
                k,
                v,
                err
            );
        }
    }

    #[test]
    fn test_output_format_from_source() {
        assert_eq!(
            OutputFormat::from_source(Some(image::ImageFormat::Png)),
            OutputFormat::Png
        );
        assert_eq!(
            OutputFormat::from_source(Some(image::ImageFormat::Tiff)),
            OutputFormat::Jpeg
        );
        assert_eq!(OutputFormat::from_source(None), OutputFormat::Jpeg);
    }
}
