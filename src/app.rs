//! Composition root: wires editor, renderer, themes, catalogue and export.

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::backend::{BackendError, DiagramBackend};
use crate::catalogue::{CatalogueSource, ExamplesStore, RetryPolicy, picker_markup};
use crate::editor::EditorSurface;
use crate::export::{DownloadSink, ExportConfig, ExportPipeline};
use crate::notice::Notice;
use crate::prefs::{MemoryStore, PreferenceStore};
use crate::raster::{RasterOptions, Rasterizer};
use crate::render::{DiagramRenderer, RenderOutcome, RenderSurface};
use crate::sanitize::DEFAULT_MAX_MARKUP_BYTES;
use crate::theme::{BackendSettings, ThemeRegistry};

/// Seeded when the catalogue cannot provide a first example.
pub const FALLBACK_SOURCE: &str = "graph TD\n    A-->B";

#[derive(Debug, Error)]
pub enum AppError {
    #[error("missing required component: {0}")]
    MissingComponent(&'static str),
    #[error("renderer initialization failed: {0}")]
    Backend(#[from] BackendError),
}

#[derive(Default)]
pub struct AppBuilder {
    backend: Option<Box<dyn DiagramBackend>>,
    sink: Option<Box<dyn DownloadSink>>,
    catalogue: Option<Box<dyn CatalogueSource>>,
    rasterizer: Option<Box<dyn Rasterizer>>,
    preferences: Option<Box<dyn PreferenceStore>>,
    retry: RetryPolicy,
    max_bytes: Option<usize>,
    raster: RasterOptions,
    timestamp_names: bool,
}

impl AppBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn backend(mut self, backend: impl DiagramBackend + 'static) -> Self {
        self.backend = Some(Box::new(backend));
        self
    }

    pub fn download_sink(mut self, sink: impl DownloadSink + 'static) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    pub fn catalogue(mut self, source: impl CatalogueSource + 'static) -> Self {
        self.catalogue = Some(Box::new(source));
        self
    }

    pub fn rasterizer(mut self, rasterizer: impl Rasterizer + 'static) -> Self {
        self.rasterizer = Some(Box::new(rasterizer));
        self
    }

    pub fn preferences(mut self, store: impl PreferenceStore + 'static) -> Self {
        self.preferences = Some(Box::new(store));
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = Some(max_bytes);
        self
    }

    pub fn raster_options(mut self, options: RasterOptions) -> Self {
        self.raster = options;
        self
    }

    pub fn timestamp_names(mut self, enabled: bool) -> Self {
        self.timestamp_names = enabled;
        self
    }

    /// Backend, download sink and catalogue are required. Without a
    /// rasterizer the app still starts with PNG export disabled.
    pub fn build(self) -> Result<App, AppError> {
        let backend = self.backend.ok_or(AppError::MissingComponent("diagram backend"))?;
        let sink = self.sink.ok_or(AppError::MissingComponent("download sink"))?;
        let catalogue = self
            .catalogue
            .ok_or(AppError::MissingComponent("example catalogue"))?;
        let preferences = self
            .preferences
            .unwrap_or_else(|| Box::new(MemoryStore::new()));

        let editor = EditorSurface::new();
        let renderer = DiagramRenderer::new(editor.subscribe());
        let exporter = ExportPipeline::new(sink, self.rasterizer)
            .with_max_bytes(self.max_bytes.unwrap_or(DEFAULT_MAX_MARKUP_BYTES));

        Ok(App {
            editor,
            renderer,
            themes: ThemeRegistry::load(preferences),
            backend,
            examples: ExamplesStore::new(catalogue, self.retry),
            exporter,
            raster: self.raster,
            timestamp_names: self.timestamp_names,
            notices: Vec::new(),
            last_outcome: None,
        })
    }
}

pub struct App {
    editor: EditorSurface,
    renderer: DiagramRenderer,
    themes: ThemeRegistry,
    backend: Box<dyn DiagramBackend>,
    examples: ExamplesStore,
    exporter: ExportPipeline,
    raster: RasterOptions,
    timestamp_names: bool,
    notices: Vec<Notice>,
    last_outcome: Option<RenderOutcome>,
}

impl App {
    pub fn builder() -> AppBuilder {
        AppBuilder::new()
    }

    /// Loads examples, seeds the editor, initializes the renderer with the
    /// active theme and performs the first render.
    pub async fn start(&mut self) -> Result<RenderOutcome, AppError> {
        self.load_examples().await;
        self.initialize_backend()?;
        Ok(self.render_current().await)
    }

    /// Fills the example picker and seeds the editor with the first entry.
    /// A catalogue failure leaves a warning notice and the fallback source.
    pub async fn load_examples(&mut self) {
        match self.examples.load().await {
            Ok(snippets) => {
                info!(count = snippets.len(), "examples loaded");
                self.editor.set_snippets(snippets);
                self.editor.load_snippet(0);
            }
            Err(err) => {
                warn!(%err, "examples unavailable");
                self.notices
                    .push(Notice::warning(format!("Examples unavailable: {err}")));
                self.editor.set_text(FALLBACK_SOURCE);
            }
        }
    }

    pub fn initialize_backend(&mut self) -> Result<(), AppError> {
        self.backend
            .initialize(&BackendSettings::for_theme(self.themes.active()))?;
        Ok(())
    }

    pub fn editor(&self) -> &EditorSurface {
        &self.editor
    }

    pub fn editor_mut(&mut self) -> &mut EditorSurface {
        &mut self.editor
    }

    pub fn themes(&self) -> &ThemeRegistry {
        &self.themes
    }

    pub fn surface(&self) -> &RenderSurface {
        self.renderer.surface()
    }

    /// Outcome of the most recent render, if any.
    pub fn last_outcome(&self) -> Option<&RenderOutcome> {
        self.last_outcome.as_ref()
    }

    pub fn png_available(&self) -> bool {
        self.exporter.png_available()
    }

    /// Replaces the editor text and renders it.
    pub async fn submit(&mut self, text: &str) -> RenderOutcome {
        self.editor.set_text(text);
        self.render_current().await
    }

    /// The render button: publish the editor text and render it.
    pub async fn render_current(&mut self) -> RenderOutcome {
        self.editor.submit();
        let outcome = self
            .renderer
            .re_render(self.backend.as_ref(), self.themes.active())
            .await;
        if let RenderOutcome::Failed { message } = &outcome {
            self.notices
                .push(Notice::error(format!("Render failed: {message}")));
        }
        self.last_outcome = Some(outcome.clone());
        outcome
    }

    /// Switches theme, re-initializes the renderer and renders again.
    pub async fn switch_theme(&mut self, key: &str) -> bool {
        if !self.themes.set_active(key) {
            self.notices
                .push(Notice::error(format!("Unknown theme `{key}`")));
            return false;
        }
        let settings = BackendSettings::for_theme(self.themes.active());
        if let Err(err) = self.backend.initialize(&settings) {
            self.notices
                .push(Notice::error(format!("Renderer rejected theme: {err}")));
        }
        debug!(%key, "theme switched");
        self.render_current().await;
        true
    }

    pub fn load_example(&mut self, index: usize) -> bool {
        self.editor.load_snippet(index)
    }

    pub fn zoom_by(&mut self, delta: f32) -> f32 {
        self.renderer.surface_mut().transform.zoom_by(delta)
    }

    pub fn pinch(&mut self, ratio: f32) -> f32 {
        self.renderer.surface_mut().transform.pinch(ratio)
    }

    pub fn reset_view(&mut self) {
        self.renderer.surface_mut().transform.reset();
    }

    pub fn toggle_pan(&mut self) -> bool {
        self.renderer.surface_mut().pan.toggle()
    }

    /// A complete pointer drag by `(dx, dy)`; ignored while panning is off.
    pub fn drag(&mut self, dx: f32, dy: f32) {
        let surface = self.renderer.surface_mut();
        let transform = surface.transform;
        surface.pan.begin_drag(&transform, 0.0, 0.0);
        surface.pan.drag_to(&mut surface.transform, dx, dy);
        surface.pan.end_drag();
    }

    fn export_config(&self, mut config: ExportConfig, file_name: Option<&str>) -> ExportConfig {
        if let Some(name) = file_name {
            config.file_name_pattern = name.to_string();
        } else if self.timestamp_names {
            config = config.timestamped();
        }
        config
    }

    pub fn export_svg(&mut self, file_name: Option<&str>) -> bool {
        let config = self.export_config(ExportConfig::svg(), file_name);
        let ok = self.exporter.export_svg(self.renderer.surface(), &config);
        self.notices.extend(self.exporter.take_notices());
        ok
    }

    pub async fn export_png(&mut self, file_name: Option<&str>) -> bool {
        let config = self.export_config(ExportConfig::png(), file_name);
        let ok = self
            .exporter
            .export_png(self.renderer.surface(), &config, &self.raster)
            .await;
        self.notices.extend(self.exporter.take_notices());
        ok
    }

    /// A standalone HTML page with the example picker and the surface.
    pub fn preview_html(&self) -> String {
        let theme = self.themes.active();
        format!(
            "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>Diagram preview</title></head>\n<body class=\"{}\">\n<select id=\"examples\">{}</select>\n{}\n</body></html>\n",
            theme.css_class,
            picker_markup(self.editor.snippets()),
            self.renderer.surface().to_html()
        )
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }
}
