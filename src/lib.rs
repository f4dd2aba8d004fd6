pub mod app;
pub mod backend;
pub mod catalogue;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod editor;
pub mod export;
pub mod notice;
pub mod prefs;
pub mod raster;
pub mod render;
#[cfg(feature = "cli")]
mod repl;
pub mod sanitize;
pub mod theme;
pub mod view;

pub use app::{App, AppBuilder, AppError};
#[cfg(feature = "cli")]
pub use cli::run;
pub use render::{RenderOutcome, SurfaceContent};
