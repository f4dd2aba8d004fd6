use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::backend::{BackendError, DiagramBackend};
use crate::sanitize::{escape_for_diagram_source, escape_for_display};
use crate::theme::{SURFACE_BACKGROUND, Theme};
use crate::view::{PanState, ViewTransform};

pub const EMPTY_PROMPT: &str = "Enter diagram source to see a preview.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceContent {
    Empty,
    Diagram { surface_id: String, markup: String },
    Error { message: String },
}

/// The output container: what it shows plus the presentation state applied
/// to it (theme class, background, border, zoom/pan).
#[derive(Debug, Clone, PartialEq)]
pub struct RenderSurface {
    content: SurfaceContent,
    theme_class: Option<String>,
    background: String,
    border: Option<String>,
    pub transform: ViewTransform,
    pub pan: PanState,
    controls_installed: bool,
}

impl Default for RenderSurface {
    fn default() -> Self {
        Self {
            content: SurfaceContent::Empty,
            theme_class: None,
            background: SURFACE_BACKGROUND.to_string(),
            border: None,
            transform: ViewTransform::identity(),
            pan: PanState::default(),
            controls_installed: false,
        }
    }
}

impl RenderSurface {
    pub fn content(&self) -> &SurfaceContent {
        &self.content
    }

    /// Markup of the current diagram, if one rendered successfully.
    pub fn diagram_markup(&self) -> Option<&str> {
        match &self.content {
            SurfaceContent::Diagram { markup, .. } => Some(markup),
            _ => None,
        }
    }

    pub fn theme_class(&self) -> Option<&str> {
        self.theme_class.as_deref()
    }

    pub fn controls_installed(&self) -> bool {
        self.controls_installed
    }

    /// Theme classes are exclusive: applying one drops any other.
    pub fn apply_theme(&mut self, theme: &Theme) {
        self.theme_class = Some(theme.css_class.clone());
        self.background = SURFACE_BACKGROUND.to_string();
        self.border = theme.surface_border.clone();
    }

    fn show_diagram(&mut self, surface_id: String, markup: String, theme: &Theme) {
        self.content = SurfaceContent::Diagram { surface_id, markup };
        self.apply_theme(theme);
        self.transform.reset();
        self.pan.end_drag();
        self.controls_installed = true;
    }

    fn show_error(&mut self, message: String) {
        self.content = SurfaceContent::Error { message };
        self.transform.reset();
        self.controls_installed = false;
    }

    fn show_empty(&mut self) {
        self.content = SurfaceContent::Empty;
        self.transform.reset();
        self.controls_installed = false;
    }

    /// Projects the surface state to HTML.
    pub fn to_html(&self) -> String {
        let mut class = String::from("render-surface");
        if let Some(theme_class) = &self.theme_class {
            class.push(' ');
            class.push_str(theme_class);
        }
        let mut style = format!("background: {};", self.background);
        if let Some(border) = &self.border {
            style.push_str(&format!(" border: {border};"));
        }

        let inner = match &self.content {
            SurfaceContent::Empty => format!("<p class=\"empty-prompt\">{EMPTY_PROMPT}</p>"),
            SurfaceContent::Error { message } => format!(
                "<pre class=\"render-error\">{}</pre>",
                escape_for_display(message)
            ),
            SurfaceContent::Diagram { markup, .. } => format!(
                "<div class=\"diagram-viewport\" style=\"transform: {}; transform-origin: 0 0;\">{markup}</div>",
                self.transform.css()
            ),
        };
        format!("<div id=\"output\" class=\"{class}\" style=\"{style}\">{inner}</div>")
    }
}

/// Where the renderer is in its cycle. The terminal succeeded/failed states
/// are reported through `RenderOutcome`; the phase returns to `Idle` once a
/// result is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderPhase {
    Idle,
    Submitting { generation: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderOutcome {
    Empty,
    Rendered { surface_id: String },
    Failed { message: String },
    /// A newer render started before this one finished; its result was dropped.
    Superseded,
}

/// One in-flight render: the escaped source and its surface identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderTicket {
    pub generation: u64,
    pub surface_id: String,
    pub source: String,
}

pub struct DiagramRenderer {
    surface: RenderSurface,
    phase: RenderPhase,
    generation: u64,
    source: watch::Receiver<String>,
}

impl DiagramRenderer {
    /// `source` follows the editor's "source changed" notifications.
    pub fn new(source: watch::Receiver<String>) -> Self {
        Self {
            surface: RenderSurface::default(),
            phase: RenderPhase::Idle,
            generation: 0,
            source,
        }
    }

    pub fn surface(&self) -> &RenderSurface {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut RenderSurface {
        &mut self.surface
    }

    pub fn phase(&self) -> RenderPhase {
        self.phase
    }

    /// Starts a render. Blank source shows the empty prompt and returns
    /// `None` without touching the backend.
    pub fn begin(&mut self, source: &str) -> Option<RenderTicket> {
        if source.trim().is_empty() {
            self.generation += 1;
            self.phase = RenderPhase::Idle;
            self.surface.show_empty();
            return None;
        }
        self.generation += 1;
        self.phase = RenderPhase::Submitting {
            generation: self.generation,
        };
        Some(RenderTicket {
            generation: self.generation,
            surface_id: new_surface_id(),
            source: escape_for_diagram_source(source),
        })
    }

    /// Applies a backend result. Results of superseded tickets are dropped.
    pub fn finish(
        &mut self,
        ticket: RenderTicket,
        result: Result<String, BackendError>,
        backend: &dyn DiagramBackend,
        theme: &Theme,
    ) -> RenderOutcome {
        if ticket.generation != self.generation {
            debug!(
                generation = ticket.generation,
                current = self.generation,
                "discarding stale render"
            );
            if result.is_err() {
                sweep_artifacts(backend, &ticket.surface_id);
            }
            return RenderOutcome::Superseded;
        }
        self.phase = RenderPhase::Idle;
        match result {
            Ok(markup) => {
                debug!(surface_id = %ticket.surface_id, "render succeeded");
                self.surface
                    .show_diagram(ticket.surface_id.clone(), markup, theme);
                RenderOutcome::Rendered {
                    surface_id: ticket.surface_id,
                }
            }
            Err(err) => {
                let removed = sweep_artifacts(backend, &ticket.surface_id);
                debug!(surface_id = %ticket.surface_id, removed, %err, "render failed");
                let message = err.to_string();
                self.surface.show_error(message.clone());
                RenderOutcome::Failed { message }
            }
        }
    }

    pub async fn render(
        &mut self,
        backend: &dyn DiagramBackend,
        theme: &Theme,
        source: &str,
    ) -> RenderOutcome {
        let Some(ticket) = self.begin(source) else {
            return RenderOutcome::Empty;
        };
        let result = backend.render(&ticket.surface_id, &ticket.source).await;
        self.finish(ticket, result, backend, theme)
    }

    /// Renders the editor's latest text again, e.g. after a theme switch.
    pub async fn re_render(&mut self, backend: &dyn DiagramBackend, theme: &Theme) -> RenderOutcome {
        let source = self.source.borrow_and_update().clone();
        self.render(backend, theme, &source).await
    }

    /// Waits for the next "source changed" notification and renders it.
    /// Returns `None` once the editor side is gone.
    pub async fn render_next_change(
        &mut self,
        backend: &dyn DiagramBackend,
        theme: &Theme,
    ) -> Option<RenderOutcome> {
        self.source.changed().await.ok()?;
        Some(self.re_render(backend, theme).await)
    }
}

/// `mermaid-<unix millis>-<random hex>`; unique across rapid re-renders.
pub fn new_surface_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let suffix = Uuid::new_v4().simple().to_string();
    format!("mermaid-{millis}-{}", &suffix[..8])
}

/// Removes the intermediate artifacts one render left in the backend's
/// scratch directory. Other renders sharing the directory are untouched.
fn sweep_artifacts(backend: &dyn DiagramBackend, surface_id: &str) -> usize {
    let Some(dir) = backend.scratch_dir() else {
        return 0;
    };
    let prefix = format!("{}{surface_id}", backend.artifact_prefix());
    remove_prefixed(dir, &prefix)
}

fn remove_prefixed(dir: &Path, prefix: &str) -> usize {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return 0,
    };
    let mut removed = 0;
    for entry in entries.flatten() {
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with(prefix) {
            continue;
        }
        match std::fs::remove_file(entry.path()) {
            Ok(()) => removed += 1,
            Err(err) => warn!(path = %entry.path().display(), %err, "failed to remove render artifact"),
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::theme::BackendSettings;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// Echoes the source into an svg, or fails when it contains "error".
    /// Failing renders leave a prefixed artifact behind, like a crashed renderer.
    struct EchoBackend {
        scratch: Option<PathBuf>,
        calls: Mutex<Vec<String>>,
    }

    impl EchoBackend {
        fn new(scratch: Option<PathBuf>) -> Self {
            Self {
                scratch,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl DiagramBackend for EchoBackend {
        fn initialize(&mut self, _settings: &BackendSettings) -> Result<(), BackendError> {
            Ok(())
        }

        async fn render(&self, surface_id: &str, source: &str) -> Result<String, BackendError> {
            self.calls.lock().unwrap().push(surface_id.to_string());
            if source.contains("error") {
                if let Some(dir) = &self.scratch {
                    std::fs::write(dir.join(format!("echo-{surface_id}")), source).unwrap();
                }
                return Err(BackendError::Syntax("Parse error on line 1".to_string()));
            }
            Ok(format!(
                "<svg id=\"{surface_id}\" xmlns=\"http://www.w3.org/2000/svg\"><text>{source}</text></svg>"
            ))
        }

        fn artifact_prefix(&self) -> &str {
            "echo-"
        }

        fn scratch_dir(&self) -> Option<&Path> {
            self.scratch.as_deref()
        }
    }

    fn renderer() -> (watch::Sender<String>, DiagramRenderer) {
        let (tx, rx) = watch::channel(String::new());
        (tx, DiagramRenderer::new(rx))
    }

    #[tokio::test]
    async fn successful_render_themes_and_resets_view() {
        let backend = EchoBackend::new(None);
        let (_tx, mut renderer) = renderer();
        renderer.surface_mut().transform.zoom_by(2.0);

        let outcome = renderer
            .render(&backend, &Theme::dark(), "graph TD\n A-->B")
            .await;
        assert!(matches!(outcome, RenderOutcome::Rendered { .. }));
        let surface = renderer.surface();
        assert_eq!(surface.theme_class(), Some("theme-dark"));
        assert_eq!(surface.transform, ViewTransform::identity());
        assert!(surface.controls_installed());
        assert_eq!(surface.diagram_markup().unwrap().matches("<svg").count(), 1);
        assert_eq!(renderer.phase(), RenderPhase::Idle);
    }

    #[tokio::test]
    async fn blank_source_never_reaches_backend() {
        let backend = EchoBackend::new(None);
        let (_tx, mut renderer) = renderer();
        let outcome = renderer.render(&backend, &Theme::mermaid_default(), "  \n\t").await;
        assert_eq!(outcome, RenderOutcome::Empty);
        assert_eq!(renderer.surface().content(), &SurfaceContent::Empty);
        assert!(backend.calls.lock().unwrap().is_empty());
        assert!(renderer.surface().to_html().contains(EMPTY_PROMPT));
    }

    #[tokio::test]
    async fn source_is_escaped_before_submission() {
        let backend = EchoBackend::new(None);
        let (_tx, mut renderer) = renderer();
        renderer
            .render(&backend, &Theme::mermaid_default(), "graph TD\n A[\"<b>x</b>\"]-->B")
            .await;
        let markup = renderer.surface().diagram_markup().unwrap();
        assert!(markup.contains("&lt;b>x&lt;/b>"));
        assert!(markup.contains("-->B"));
    }

    #[tokio::test]
    async fn failure_clears_previous_diagram_and_sweeps_artifacts() {
        let scratch = tempfile::tempdir().unwrap();
        std::fs::write(scratch.path().join("unrelated.txt"), "keep").unwrap();
        let backend = EchoBackend::new(Some(scratch.path().to_path_buf()));
        let (_tx, mut renderer) = renderer();
        let theme = Theme::mermaid_default();

        renderer.render(&backend, &theme, "graph TD\n A-->B").await;
        assert!(renderer.surface().diagram_markup().is_some());

        let outcome = renderer.render(&backend, &theme, "graph TD\n error").await;
        assert_eq!(
            outcome,
            RenderOutcome::Failed {
                message: "Parse error on line 1".to_string()
            }
        );
        assert_eq!(renderer.surface().diagram_markup(), None);
        assert!(renderer.surface().to_html().contains("render-error"));
        let names: Vec<String> = std::fs::read_dir(scratch.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["unrelated.txt"]);
    }

    #[tokio::test]
    async fn stale_completion_is_discarded() {
        let backend = EchoBackend::new(None);
        let (_tx, mut renderer) = renderer();
        let theme = Theme::mermaid_default();

        let first = renderer.begin("graph TD\n A-->B").unwrap();
        let second = renderer.begin("graph TD\n C-->D").unwrap();
        assert_ne!(first.surface_id, second.surface_id);

        let second_result = backend.render(&second.surface_id, &second.source).await;
        let outcome = renderer.finish(second, second_result, &backend, &theme);
        assert!(matches!(outcome, RenderOutcome::Rendered { .. }));

        let first_result = backend.render(&first.surface_id, &first.source).await;
        let outcome = renderer.finish(first, first_result, &backend, &theme);
        assert_eq!(outcome, RenderOutcome::Superseded);
        assert!(renderer.surface().diagram_markup().unwrap().contains("C-->D"));
    }

    #[tokio::test]
    async fn re_render_uses_latest_editor_text() {
        let backend = EchoBackend::new(None);
        let (tx, mut renderer) = renderer();
        tx.send("graph LR\n X-->Y".to_string()).unwrap();

        let outcome = renderer.re_render(&backend, &Theme::custom()).await;
        assert!(matches!(outcome, RenderOutcome::Rendered { .. }));
        let html = renderer.surface().to_html();
        assert!(html.contains("X-->Y"));
        assert!(html.contains("theme-custom"));
        assert!(html.contains("border: 2px solid #1f6feb"));
    }

    #[tokio::test]
    async fn stale_failure_sweeps_only_its_own_artifacts() {
        let scratch = tempfile::tempdir().unwrap();
        let neighbour = scratch.path().join("echo-mermaid-1-otherproc");
        std::fs::write(&neighbour, "in flight").unwrap();
        let backend = EchoBackend::new(Some(scratch.path().to_path_buf()));
        let (_tx, mut renderer) = renderer();
        let theme = Theme::mermaid_default();

        let stale = renderer.begin("graph TD\n error").unwrap();
        let current = renderer.begin("graph TD\n C-->D").unwrap();

        let current_result = backend.render(&current.surface_id, &current.source).await;
        renderer.finish(current, current_result, &backend, &theme);

        let stale_id = stale.surface_id.clone();
        let stale_result = backend.render(&stale.surface_id, &stale.source).await;
        assert!(scratch.path().join(format!("echo-{stale_id}")).exists());
        let outcome = renderer.finish(stale, stale_result, &backend, &theme);

        assert_eq!(outcome, RenderOutcome::Superseded);
        assert!(!scratch.path().join(format!("echo-{stale_id}")).exists());
        assert!(neighbour.exists());
        assert!(renderer.surface().diagram_markup().unwrap().contains("C-->D"));
    }

    #[tokio::test]
    async fn failure_leaves_other_renders_artifacts_alone() {
        let scratch = tempfile::tempdir().unwrap();
        let neighbour = scratch.path().join("echo-mermaid-1-otherproc.mmd");
        std::fs::write(&neighbour, "in flight").unwrap();
        let backend = EchoBackend::new(Some(scratch.path().to_path_buf()));
        let (_tx, mut renderer) = renderer();

        let outcome = renderer
            .render(&backend, &Theme::mermaid_default(), "graph TD\n error")
            .await;
        assert!(matches!(outcome, RenderOutcome::Failed { .. }));
        assert!(neighbour.exists());
    }

    #[tokio::test]
    async fn renders_on_source_change_until_editor_is_gone() {
        let backend = EchoBackend::new(None);
        let (tx, mut renderer) = renderer();
        let theme = Theme::mermaid_default();

        tx.send("graph TD\n P-->Q".to_string()).unwrap();
        let outcome = renderer.render_next_change(&backend, &theme).await;
        assert!(matches!(outcome, Some(RenderOutcome::Rendered { .. })));
        assert!(renderer.surface().diagram_markup().unwrap().contains("P-->Q"));

        drop(tx);
        assert_eq!(renderer.render_next_change(&backend, &theme).await, None);
    }

    #[test]
    fn surface_ids_are_unique() {
        let ids: std::collections::HashSet<String> = (0..200).map(|_| new_surface_id()).collect();
        assert_eq!(ids.len(), 200);
        assert!(ids.iter().all(|id| id.starts_with("mermaid-")));
    }
}
