//! Boundary to the external diagram renderer.
//!
//! The renderer is a black box: it takes diagram source and a surface
//! identifier and eventually returns SVG markup or a syntax error.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::theme::BackendSettings;

/// Prefix of every intermediate artifact the command backend leaves behind.
pub const COMMAND_ARTIFACT_PREFIX: &str = "mmds-render-";

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("{0}")]
    Syntax(String),
    #[error("failed to launch renderer `{program}`: {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("renderer produced no output")]
    EmptyOutput,
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[async_trait]
pub trait DiagramBackend: Send + Sync {
    /// Applies settings that the renderer only reads at initialization
    /// (theme and theme variables).
    fn initialize(&mut self, settings: &BackendSettings) -> Result<(), BackendError>;

    async fn render(&self, surface_id: &str, source: &str) -> Result<String, BackendError>;

    /// Prefix shared by the intermediate artifacts of this backend.
    fn artifact_prefix(&self) -> &str;

    /// Where intermediate artifacts live, if the backend creates any.
    fn scratch_dir(&self) -> Option<&Path> {
        None
    }
}

/// Runs an external renderer executable per render.
///
/// The program is invoked as `program [args..] -i <input> -o <output.svg> -c <config.json>`,
/// which matches the `mmdr` and `mmdc` command lines.
#[derive(Debug, Clone)]
pub struct CommandBackend {
    program: String,
    args: Vec<String>,
    scratch_dir: PathBuf,
    settings: Option<BackendSettings>,
}

impl CommandBackend {
    pub fn new(program: impl Into<String>, args: Vec<String>, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args,
            scratch_dir: scratch_dir.into(),
            settings: None,
        }
    }

    fn artifact(&self, surface_id: &str, ext: &str) -> PathBuf {
        self.scratch_dir
            .join(format!("{COMMAND_ARTIFACT_PREFIX}{surface_id}.{ext}"))
    }
}

#[async_trait]
impl DiagramBackend for CommandBackend {
    fn initialize(&mut self, settings: &BackendSettings) -> Result<(), BackendError> {
        self.settings = Some(settings.clone());
        Ok(())
    }

    async fn render(&self, surface_id: &str, source: &str) -> Result<String, BackendError> {
        tokio::fs::create_dir_all(&self.scratch_dir).await?;
        let input = self.artifact(surface_id, "mmd");
        let output = self.artifact(surface_id, "svg");
        let config = self.artifact(surface_id, "json");

        tokio::fs::write(&input, source).await?;
        let mut command = tokio::process::Command::new(&self.program);
        command.args(&self.args).arg("-i").arg(&input).arg("-o").arg(&output);
        if let Some(settings) = &self.settings {
            let body = serde_json::to_string(settings).map_err(io::Error::other)?;
            tokio::fs::write(&config, body).await?;
            command.arg("-c").arg(&config);
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        debug!(program = %self.program, %surface_id, "spawning renderer");
        let result = command.output().await.map_err(|source| BackendError::Launch {
            program: self.program.clone(),
            source,
        })?;
        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                format!("renderer exited with {}", result.status)
            } else {
                stderr
            };
            return Err(BackendError::Syntax(message));
        }

        let svg = tokio::fs::read_to_string(&output).await?;
        for path in [&input, &output, &config] {
            let _ = tokio::fs::remove_file(path).await;
        }
        if svg.trim().is_empty() {
            return Err(BackendError::EmptyOutput);
        }
        Ok(svg)
    }

    fn artifact_prefix(&self) -> &str {
        COMMAND_ARTIFACT_PREFIX
    }

    fn scratch_dir(&self) -> Option<&Path> {
        Some(&self.scratch_dir)
    }
}
