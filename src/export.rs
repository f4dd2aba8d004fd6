//! SVG and PNG export of the render surface.

use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tracing::{debug, warn};

use crate::notice::Notice;
use crate::raster::{RasterError, RasterOptions, Rasterizer};
use crate::render::RenderSurface;
use crate::sanitize::{DEFAULT_MAX_MARKUP_BYTES, SanitizeError, Sanitizer};

pub const SVG_MIME: &str = "image/svg+xml";
pub const PNG_MIME: &str = "image/png";
pub const DEFAULT_PNG_QUALITY: f32 = 0.95;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Svg,
    Png,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportConfig {
    /// File name; `{timestamp}` expands to unix seconds.
    pub file_name_pattern: String,
    pub mime_type: String,
    pub quality: f32,
}

impl ExportConfig {
    pub fn svg() -> Self {
        Self {
            file_name_pattern: "diagram.svg".to_string(),
            mime_type: SVG_MIME.to_string(),
            quality: 1.0,
        }
    }

    pub fn png() -> Self {
        Self {
            file_name_pattern: "diagram.png".to_string(),
            mime_type: PNG_MIME.to_string(),
            quality: DEFAULT_PNG_QUALITY,
        }
    }

    pub fn timestamped(mut self) -> Self {
        let ext = Path::new(&self.file_name_pattern)
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default()
            .to_string();
        let stem = Path::new(&self.file_name_pattern)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("diagram")
            .to_string();
        self.file_name_pattern = if ext.is_empty() {
            format!("{stem}-{{timestamp}}")
        } else {
            format!("{stem}-{{timestamp}}.{ext}")
        };
        self
    }

    pub fn file_name(&self) -> String {
        let seconds = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        self.file_name_pattern
            .replace("{timestamp}", &seconds.to_string())
    }
}

/// A finished export handed to a sink. Ownership moves into the sink, so
/// the bytes never outlive the export call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

pub trait DownloadSink: Send {
    fn deliver(&mut self, download: Download) -> io::Result<PathBuf>;
}

/// Saves downloads into a directory.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl DownloadSink for DirectorySink {
    fn deliver(&mut self, download: Download) -> io::Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        // Names may arrive as full paths from the CLI; only the file name counts.
        let name = Path::new(&download.file_name)
            .file_name()
            .map(|name| name.to_os_string())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty file name"))?;
        let path = self.dir.join(name);
        std::fs::write(&path, download.bytes)?;
        Ok(path)
    }
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("nothing to export: render a diagram first")]
    NoDiagram,
    #[error("png export is unavailable: no rasterizer is loaded")]
    PngUnavailable,
    #[error("export is {size} bytes, limit is {limit}")]
    TooLarge { size: usize, limit: usize },
    #[error(transparent)]
    Sanitize(#[from] SanitizeError),
    #[error(transparent)]
    Raster(#[from] RasterError),
    #[error("failed to save {file_name}: {source}")]
    Save {
        file_name: String,
        #[source]
        source: io::Error,
    },
}

pub struct ExportPipeline {
    sanitizer: Sanitizer,
    sink: Box<dyn DownloadSink>,
    rasterizer: Option<Box<dyn Rasterizer>>,
    notices: Vec<Notice>,
}

impl ExportPipeline {
    pub fn new(sink: Box<dyn DownloadSink>, rasterizer: Option<Box<dyn Rasterizer>>) -> Self {
        if rasterizer.is_none() {
            warn!("no rasterizer available, png export disabled");
        }
        Self {
            sanitizer: Sanitizer::new(DEFAULT_MAX_MARKUP_BYTES),
            sink,
            rasterizer,
            notices: Vec::new(),
        }
    }

    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.sanitizer = Sanitizer::new(max_bytes);
        self
    }

    pub fn png_available(&self) -> bool {
        self.rasterizer.is_some()
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    /// Exports the surface's diagram as SVG. Failures become notices.
    pub fn export_svg(&mut self, surface: &RenderSurface, config: &ExportConfig) -> bool {
        let result = self.try_export_svg(surface, config);
        self.report(result)
    }

    /// Exports the surface's diagram as PNG. Failures become notices.
    pub async fn export_png(
        &mut self,
        surface: &RenderSurface,
        config: &ExportConfig,
        options: &RasterOptions,
    ) -> bool {
        let result = self.try_export_png(surface, config, options).await;
        self.report(result)
    }

    pub fn try_export_svg(
        &mut self,
        surface: &RenderSurface,
        config: &ExportConfig,
    ) -> Result<PathBuf, ExportError> {
        let markup = surface.diagram_markup().ok_or(ExportError::NoDiagram)?;
        let clean = self.sanitizer.sanitize_markup(markup)?;
        self.deliver(config, clean.into_bytes())
    }

    pub async fn try_export_png(
        &mut self,
        surface: &RenderSurface,
        config: &ExportConfig,
        options: &RasterOptions,
    ) -> Result<PathBuf, ExportError> {
        let markup = surface.diagram_markup().ok_or(ExportError::NoDiagram)?;
        let rasterizer = self.rasterizer.as_ref().ok_or(ExportError::PngUnavailable)?;
        let clean = self.sanitizer.sanitize_markup(markup)?;
        let raster = rasterizer.rasterize(&clean, options).await?;
        debug!(width = raster.width, height = raster.height, "rasterized diagram");
        let png = raster.encode_png(config.quality)?;
        if png.len() > self.sanitizer.max_bytes {
            return Err(ExportError::TooLarge {
                size: png.len(),
                limit: self.sanitizer.max_bytes,
            });
        }
        self.deliver(config, png)
    }

    fn deliver(&mut self, config: &ExportConfig, bytes: Vec<u8>) -> Result<PathBuf, ExportError> {
        let file_name = config.file_name();
        let download = Download {
            file_name: file_name.clone(),
            mime_type: config.mime_type.clone(),
            bytes,
        };
        self.sink
            .deliver(download)
            .map_err(|source| ExportError::Save { file_name, source })
    }

    fn report(&mut self, result: Result<PathBuf, ExportError>) -> bool {
        match result {
            Ok(path) => {
                self.notices
                    .push(Notice::info(format!("Saved {}", path.display())));
                true
            }
            Err(err) => {
                warn!(%err, "export failed");
                self.notices.push(Notice::error(format!("Export failed: {err}")));
                false
            }
        }
    }
}
