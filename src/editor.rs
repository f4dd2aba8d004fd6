use tokio::sync::watch;

use crate::catalogue::ExampleSnippet;

/// The source text panel and its render trigger.
///
/// Submitting publishes the current text on a watch channel; the renderer
/// holds the receiving end.
pub struct EditorSurface {
    text: String,
    snippets: Vec<ExampleSnippet>,
    changes: watch::Sender<String>,
}

impl Default for EditorSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl EditorSurface {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(String::new());
        Self {
            text: String::new(),
            snippets: Vec::new(),
            changes,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<String> {
        self.changes.subscribe()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    pub fn append_line(&mut self, line: &str) {
        if !self.text.is_empty() && !self.text.ends_with('\n') {
            self.text.push('\n');
        }
        self.text.push_str(line);
    }

    pub fn clear(&mut self) {
        self.text.clear();
    }

    pub fn set_snippets(&mut self, snippets: Vec<ExampleSnippet>) {
        self.snippets = snippets;
    }

    pub fn snippets(&self) -> &[ExampleSnippet] {
        &self.snippets
    }

    /// Replaces the text with snippet `index`. Out of range leaves it alone.
    pub fn load_snippet(&mut self, index: usize) -> bool {
        match self.snippets.get(index) {
            Some(snippet) => {
                self.text = snippet.code.clone();
                true
            }
            None => false,
        }
    }

    /// Announces the current text as changed, even if it is identical.
    pub fn submit(&self) {
        self.changes.send_replace(self.text.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snippet(title: &str, code: &str) -> ExampleSnippet {
        ExampleSnippet {
            title: title.to_string(),
            code: code.to_string(),
        }
    }

    #[test]
    fn submit_publishes_current_text() {
        let mut editor = EditorSurface::new();
        let mut rx = editor.subscribe();
        editor.set_text("graph TD");
        editor.append_line(" A-->B");
        editor.submit();
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), "graph TD\n A-->B");

        editor.submit();
        assert!(rx.has_changed().unwrap());
    }

    #[test]
    fn loads_snippets_by_index() {
        let mut editor = EditorSurface::new();
        editor.set_snippets(vec![snippet("One", "graph TD\n A-->B"), snippet("Two", "pie")]);
        assert!(editor.load_snippet(1));
        assert_eq!(editor.text(), "pie");
        assert!(!editor.load_snippet(2));
        assert_eq!(editor.text(), "pie");
    }
}
