//! Line-oriented editor session on stdin.
//!
//! Plain lines are appended to the diagram source; lines starting with `:`
//! are commands.

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::app::App;
use crate::cli::print_notices;
use crate::render::{RenderOutcome, SurfaceContent};

const HELP: &str = "\
:render            render the current source
:show              print the current source
:clear             clear the source
:examples          list examples
:example N         load example N
:themes            list themes
:theme KEY         switch theme and re-render
:zoom D            change zoom by D
:pinch R           scale zoom by R
:reset             reset zoom and pan
:pan               toggle panning
:drag X Y          drag the diagram by X,Y (panning must be on)
:export svg|png [NAME]
:html PATH         write an HTML preview
:quit";

#[derive(Debug, PartialEq)]
enum Action {
    Append(String),
    Render,
    Show,
    Clear,
    Examples,
    Example(usize),
    Themes,
    Theme(String),
    Zoom(f32),
    Pinch(f32),
    Reset,
    Pan,
    Drag(f32, f32),
    ExportSvg(Option<String>),
    ExportPng(Option<String>),
    Html(String),
    Help,
    Quit,
}

fn parse_line(line: &str) -> Result<Action, String> {
    let Some(command) = line.trim_end().strip_prefix(':') else {
        return Ok(Action::Append(line.to_string()));
    };
    let mut parts = command.split_whitespace();
    let name = parts.next().unwrap_or_default();
    let args: Vec<&str> = parts.collect();
    let number = |idx: usize| -> Result<f32, String> {
        args.get(idx)
            .ok_or_else(|| format!(":{name} needs a number"))?
            .parse::<f32>()
            .map_err(|err| format!(":{name}: {err}"))
    };

    let action = match name {
        "render" | "r" => Action::Render,
        "show" => Action::Show,
        "clear" => Action::Clear,
        "examples" => Action::Examples,
        "example" => Action::Example(
            args.first()
                .and_then(|arg| arg.parse().ok())
                .ok_or(":example needs an index")?,
        ),
        "themes" => Action::Themes,
        "theme" => Action::Theme(args.first().ok_or(":theme needs a key")?.to_string()),
        "zoom" => Action::Zoom(number(0)?),
        "pinch" => Action::Pinch(number(0)?),
        "reset" => Action::Reset,
        "pan" => Action::Pan,
        "drag" => Action::Drag(number(0)?, number(1)?),
        "export" => {
            let name = args.get(1).map(|s| s.to_string());
            match args.first().copied() {
                Some("svg") => Action::ExportSvg(name),
                Some("png") => Action::ExportPng(name),
                _ => return Err(":export needs svg or png".to_string()),
            }
        }
        "html" => Action::Html(args.first().ok_or(":html needs a path")?.to_string()),
        "help" | "h" => Action::Help,
        "quit" | "q" => Action::Quit,
        other => return Err(format!("unknown command :{other}")),
    };
    Ok(action)
}

pub async fn run(mut app: App) -> Result<()> {
    let outcome = app.start().await?;
    print_notices(&mut app);
    report(&app, &outcome);
    if !app.png_available() {
        eprintln!("warning: png export disabled");
    }
    println!("type :help for commands");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let action = match parse_line(&line) {
            Ok(action) => action,
            Err(message) => {
                eprintln!("error: {message}");
                continue;
            }
        };
        if !apply(&mut app, action).await {
            break;
        }
        print_notices(&mut app);
    }
    Ok(())
}

/// Applies one action. Failures are reported and the session continues;
/// only `:quit` returns `false`.
async fn apply(app: &mut App, action: Action) -> bool {
    match action {
        Action::Append(line) => app.editor_mut().append_line(&line),
        Action::Render => {
            let outcome = app.render_current().await;
            report(app, &outcome);
        }
        Action::Show => println!("{}", app.editor().text()),
        Action::Clear => app.editor_mut().clear(),
        Action::Examples => {
            for (idx, snippet) in app.editor().snippets().iter().enumerate() {
                println!("{idx:>3}  {}", snippet.title);
            }
        }
        Action::Example(index) => {
            if app.load_example(index) {
                let outcome = app.render_current().await;
                report(app, &outcome);
            } else {
                eprintln!("error: no example with index {index}");
            }
        }
        Action::Themes => {
            let active = app.themes().active().key.clone();
            for theme in app.themes().themes() {
                let marker = if theme.key == active { "*" } else { " " };
                println!("{marker} {:<8} {}", theme.key, theme.display_name);
            }
        }
        Action::Theme(key) => {
            if app.switch_theme(&key).await {
                if let Some(outcome) = app.last_outcome().cloned() {
                    report(app, &outcome);
                }
            }
        }
        Action::Zoom(delta) => println!("zoom {:.2}", app.zoom_by(delta)),
        Action::Pinch(ratio) => println!("zoom {:.2}", app.pinch(ratio)),
        Action::Reset => app.reset_view(),
        Action::Pan => {
            let enabled = app.toggle_pan();
            println!("panning {}", if enabled { "on" } else { "off" });
        }
        Action::Drag(dx, dy) => {
            app.drag(dx, dy);
            println!("{}", app.surface().transform.css());
        }
        Action::ExportSvg(name) => {
            app.export_svg(name.as_deref());
        }
        Action::ExportPng(name) => {
            app.export_png(name.as_deref()).await;
        }
        Action::Html(path) => match std::fs::write(&path, app.preview_html()) {
            Ok(()) => println!("wrote {path}"),
            Err(err) => eprintln!("error: failed to write {path}: {err}"),
        },
        Action::Help => println!("{HELP}"),
        Action::Quit => return false,
    }
    true
}

fn report(app: &App, outcome: &RenderOutcome) {
    match outcome {
        RenderOutcome::Rendered { surface_id } => {
            let theme = app.surface().theme_class().unwrap_or("none");
            println!("rendered {surface_id} ({theme})");
        }
        RenderOutcome::Empty => println!("nothing to render"),
        RenderOutcome::Failed { .. } => {
            if let SurfaceContent::Error { message } = app.surface().content() {
                println!("render error: {message}");
            }
        }
        RenderOutcome::Superseded => {}
    }
}
