use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::catalogue::RetryPolicy;
use crate::export::DEFAULT_PNG_QUALITY;
use crate::raster::RasterOptions;
use crate::sanitize::DEFAULT_MAX_MARKUP_BYTES;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RendererConfig {
    pub program: String,
    pub args: Vec<String>,
    pub scratch_dir: PathBuf,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            program: "mmdr".to_string(),
            args: Vec::new(),
            scratch_dir: std::env::temp_dir().join("mermaid-studio"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogueConfig {
    /// `None` uses the built-in catalogue.
    pub path: Option<PathBuf>,
    pub attempts: u32,
    pub backoff_ms: u64,
}

impl Default for CatalogueConfig {
    fn default() -> Self {
        Self {
            path: None,
            attempts: 3,
            backoff_ms: 250,
        }
    }
}

impl CatalogueConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.attempts.max(1),
            backoff: Duration::from_millis(self.backoff_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportSettings {
    pub output_dir: PathBuf,
    pub max_bytes: usize,
    pub png_scale: f32,
    pub png_quality: f32,
    pub background: String,
    pub allow_cross_origin: bool,
    pub timestamp_names: bool,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            max_bytes: DEFAULT_MAX_MARKUP_BYTES,
            png_scale: 2.0,
            png_quality: DEFAULT_PNG_QUALITY,
            background: "#FFFFFF".to_string(),
            allow_cross_origin: true,
            timestamp_names: false,
        }
    }
}

impl ExportSettings {
    pub fn raster_options(&self) -> RasterOptions {
        RasterOptions {
            scale: self.png_scale,
            background: self.background.clone(),
            allow_cross_origin: self.allow_cross_origin,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub renderer: RendererConfig,
    pub catalogue: CatalogueConfig,
    pub export: ExportSettings,
    pub preferences_path: Option<PathBuf>,
}

impl Config {
    pub fn preferences_path(&self) -> PathBuf {
        self.preferences_path
            .clone()
            .unwrap_or_else(default_preferences_path)
    }
}

pub fn default_preferences_path() -> PathBuf {
    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg)
            .join("mermaid-studio")
            .join("preferences.json");
    }
    if let Some(home) = std::env::var_os("HOME") {
        return PathBuf::from(home)
            .join(".config")
            .join("mermaid-studio")
            .join("preferences.json");
    }
    PathBuf::from(".mermaid-studio.json")
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RendererFile {
    program: Option<String>,
    args: Option<Vec<String>>,
    scratch_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CatalogueFile {
    path: Option<PathBuf>,
    attempts: Option<u32>,
    backoff_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExportFile {
    output_dir: Option<PathBuf>,
    max_bytes: Option<usize>,
    png_scale: Option<f32>,
    png_quality: Option<f32>,
    background: Option<String>,
    allow_cross_origin: Option<bool>,
    timestamp_names: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    renderer: Option<RendererFile>,
    catalogue: Option<CatalogueFile>,
    export: Option<ExportFile>,
    preferences_path: Option<PathBuf>,
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let mut config = Config::default();
    let Some(path) = path else {
        return Ok(config);
    };

    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let parsed: ConfigFile = serde_json::from_str(&contents)
        .with_context(|| format!("invalid config {}", path.display()))?;

    if let Some(renderer) = parsed.renderer {
        if let Some(v) = renderer.program {
            config.renderer.program = v;
        }
        if let Some(v) = renderer.args {
            config.renderer.args = v;
        }
        if let Some(v) = renderer.scratch_dir {
            config.renderer.scratch_dir = v;
        }
    }

    if let Some(catalogue) = parsed.catalogue {
        if let Some(v) = catalogue.path {
            config.catalogue.path = Some(v);
        }
        if let Some(v) = catalogue.attempts {
            config.catalogue.attempts = v;
        }
        if let Some(v) = catalogue.backoff_ms {
            config.catalogue.backoff_ms = v;
        }
    }

    if let Some(export) = parsed.export {
        if let Some(v) = export.output_dir {
            config.export.output_dir = v;
        }
        if let Some(v) = export.max_bytes {
            config.export.max_bytes = v;
        }
        if let Some(v) = export.png_scale {
            config.export.png_scale = v;
        }
        if let Some(v) = export.png_quality {
            anyhow::ensure!(
                v > 0.0 && v <= 1.0,
                "export.pngQuality must be in (0, 1], got {v}"
            );
            config.export.png_quality = v;
        }
        if let Some(v) = export.background {
            config.export.background = v;
        }
        if let Some(v) = export.allow_cross_origin {
            config.export.allow_cross_origin = v;
        }
        if let Some(v) = export.timestamp_names {
            config.export.timestamp_names = v;
        }
    }

    if let Some(v) = parsed.preferences_path {
        config.preferences_path = Some(v);
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_file() {
        let config = load_config(None).unwrap();
        assert_eq!(config.renderer.program, "mmdr");
        assert_eq!(config.catalogue.attempts, 3);
        assert_eq!(config.export.max_bytes, 10 * 1024 * 1024);
        assert_eq!(config.export.png_quality, 0.95);
    }

    #[test]
    fn merges_partial_file_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"renderer": {"program": "mmdc", "args": ["--quiet"]}, "export": {"pngScale": 3, "timestampNames": true}, "catalogue": {"backoffMs": 0}}"#,
        )
        .unwrap();
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.renderer.program, "mmdc");
        assert_eq!(config.renderer.args, ["--quiet"]);
        assert_eq!(config.export.png_scale, 3.0);
        assert!(config.export.timestamp_names);
        assert_eq!(config.export.background, "#FFFFFF");
        assert_eq!(config.catalogue.retry_policy().backoff, Duration::ZERO);
        assert_eq!(config.catalogue.retry_policy().attempts, 3);
    }

    #[test]
    fn rejects_out_of_range_quality() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"export": {"pngQuality": 1.5}}"#).unwrap();
        assert!(load_config(Some(&path)).is_err());
    }
}
