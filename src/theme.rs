use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::prefs::PreferenceStore;

/// Storage slot holding the active theme key.
pub const THEME_STORAGE_KEY: &str = "mermaid-studio.theme";
pub const DEFAULT_THEME_KEY: &str = "default";

/// Every theme renders on white so diagrams stay legible on light and dark pages.
pub const SURFACE_BACKGROUND: &str = "#FFFFFF";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Theme {
    pub key: String,
    pub display_name: String,
    pub renderer_theme_id: String,
    pub css_class: String,
    pub color_variables: BTreeMap<String, String>,
    pub surface_border: Option<String>,
}

fn variables(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect()
}

impl Theme {
    pub fn mermaid_default() -> Self {
        Self {
            key: "default".to_string(),
            display_name: "Default".to_string(),
            renderer_theme_id: "default".to_string(),
            css_class: "theme-default".to_string(),
            color_variables: variables(&[("background", SURFACE_BACKGROUND)]),
            surface_border: None,
        }
    }

    pub fn dark() -> Self {
        Self {
            key: "dark".to_string(),
            display_name: "Dark".to_string(),
            renderer_theme_id: "base".to_string(),
            css_class: "theme-dark".to_string(),
            color_variables: variables(&[
                ("background", SURFACE_BACKGROUND),
                ("primaryColor", "#000000"),
                ("primaryTextColor", "#FFFFFF"),
                ("primaryBorderColor", "#FFFFFF"),
                ("lineColor", "#000000"),
                ("secondaryColor", "#FFFFFF"),
                ("tertiaryColor", "#000000"),
                ("edgeLabelBackground", "#FFFFFF"),
                ("clusterBkg", "#FFFFFF"),
                ("clusterBorder", "#000000"),
                ("textColor", "#000000"),
            ]),
            surface_border: None,
        }
    }

    pub fn custom() -> Self {
        Self {
            key: "custom".to_string(),
            display_name: "Custom".to_string(),
            renderer_theme_id: "base".to_string(),
            css_class: "theme-custom".to_string(),
            color_variables: variables(&[
                ("background", SURFACE_BACKGROUND),
                ("primaryColor", "#DBEAFE"),
                ("primaryTextColor", "#1E3A8A"),
                ("primaryBorderColor", "#1F6FEB"),
                ("lineColor", "#F97316"),
                ("secondaryColor", "#FFEDD5"),
                ("tertiaryColor", "#EFF6FF"),
                ("edgeLabelBackground", "#FFF7ED"),
                ("clusterBkg", "#EFF6FF"),
                ("clusterBorder", "#F97316"),
                ("textColor", "#1E3A8A"),
            ]),
            surface_border: Some("2px solid #1f6feb".to_string()),
        }
    }

    pub fn builtin() -> Vec<Self> {
        vec![Self::mermaid_default(), Self::dark(), Self::custom()]
    }
}

/// The renderer's initialization payload for one theme.
///
/// Serializes to the Mermaid config shape (`theme` + `themeVariables`) that
/// renderers accept through a config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendSettings {
    pub theme: String,
    pub theme_variables: BTreeMap<String, String>,
}

impl BackendSettings {
    pub fn for_theme(theme: &Theme) -> Self {
        let mut theme_variables = theme.color_variables.clone();
        theme_variables.insert("background".to_string(), SURFACE_BACKGROUND.to_string());
        Self {
            theme: theme.renderer_theme_id.clone(),
            theme_variables,
        }
    }
}

pub struct ThemeRegistry {
    themes: Vec<Theme>,
    active: usize,
    store: Box<dyn PreferenceStore>,
}

impl ThemeRegistry {
    /// Builds the registry and restores the persisted theme, falling back
    /// to `default` when the slot is empty or names an unknown theme.
    pub fn load(store: Box<dyn PreferenceStore>) -> Self {
        let themes = Theme::builtin();
        let stored = store.get(THEME_STORAGE_KEY);
        let active = stored
            .as_deref()
            .and_then(|key| themes.iter().position(|theme| theme.key == key))
            .unwrap_or(0);
        if let Some(key) = stored.filter(|key| themes[active].key != *key) {
            warn!(%key, "unknown stored theme, using default");
        }
        Self {
            themes,
            active,
            store,
        }
    }

    pub fn active(&self) -> &Theme {
        &self.themes[self.active]
    }

    pub fn themes(&self) -> &[Theme] {
        &self.themes
    }

    pub fn get(&self, key: &str) -> Option<&Theme> {
        self.themes.iter().find(|theme| theme.key == key)
    }

    /// Switches to `key` and persists it. Unknown keys leave everything as is.
    pub fn set_active(&mut self, key: &str) -> bool {
        let Some(index) = self.themes.iter().position(|theme| theme.key == key) else {
            return false;
        };
        self.active = index;
        if let Err(err) = self.store.set(THEME_STORAGE_KEY, key) {
            warn!(%key, %err, "failed to persist theme");
        }
        true
    }
}
