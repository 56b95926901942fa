//! Accent-color to icon-theme mapping and local theme resolution.
//!
//! The mapping is pure: the distinguished default color maps to the base
//! theme, every other color maps to `Adwaita-{color}`. Resolution walks an
//! ordered list of icon roots and stops at the first root that contains the
//! derived theme directory. Absence is an expected outcome, not an error.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

/// The accent value that maps to the base theme and never requires an install.
pub const DEFAULT_ACCENT: &str = "blue";

/// Name of the base icon theme shipped with the desktop.
pub const BASE_THEME: &str = "Adwaita";

/// A non-empty accent-color token read from the settings store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccentColor(String);

impl AccentColor {
    /// Returns `None` for empty or whitespace-only input; callers treat that
    /// as "no accent selected" and skip the sync entirely.
    pub fn new(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_default(&self) -> bool {
        self.0 == DEFAULT_ACCENT
    }
}

impl std::fmt::Display for AccentColor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derived icon-theme package name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThemeId(String);

impl ThemeId {
    pub fn from_accent(color: &AccentColor) -> Self {
        if color.is_default() {
            Self(BASE_THEME.to_string())
        } else {
            Self(format!("{BASE_THEME}-{color}"))
        }
    }

    /// The theme applied when no accent-specific theme is available.
    pub fn base() -> Self {
        Self(BASE_THEME.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ThemeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who owns an icon root. Only user-owned roots are ever written by the
/// install pipeline; system roots are read-only from our perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    System,
    User,
}

/// One directory searched for installed icon themes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IconRoot {
    pub path: PathBuf,
    pub ownership: Ownership,
}

impl IconRoot {
    pub fn system(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ownership: Ownership::System,
        }
    }

    pub fn user(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ownership: Ownership::User,
        }
    }
}

/// Result of a single resolution. Produced per call and never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub theme: ThemeId,
    pub found: bool,
    /// The root that contained the theme, when found by a filesystem search.
    /// `None` for the default color, which is found by definition.
    pub root: Option<IconRoot>,
}

impl Resolution {
    pub fn ownership(&self) -> Option<Ownership> {
        self.root.as_ref().map(|r| r.ownership)
    }
}

/// Injectable existence probe so tests never depend on real filesystem state.
pub type PathProbe = Arc<dyn Fn(&Path) -> bool + Send + Sync>;

/// Searches icon roots, in order, for the theme derived from an accent color.
///
/// System roots are listed before the user root: a system-wide install takes
/// precedence because the search stops at the first match.
#[derive(Clone)]
pub struct ThemeResolver {
    roots: Vec<IconRoot>,
    probe: PathProbe,
}

impl ThemeResolver {
    pub fn new(roots: Vec<IconRoot>) -> Self {
        Self::with_probe(roots, Arc::new(|path: &Path| path.is_dir()))
    }

    pub fn with_probe(roots: Vec<IconRoot>, probe: PathProbe) -> Self {
        Self { roots, probe }
    }

    pub fn roots(&self) -> &[IconRoot] {
        &self.roots
    }

    /// Pure lookup with no side effects. The default color short-circuits to
    /// "found" without touching the filesystem.
    pub fn resolve(&self, color: &AccentColor) -> Resolution {
        let theme = ThemeId::from_accent(color);
        if color.is_default() {
            return Resolution {
                theme,
                found: true,
                root: None,
            };
        }
        for root in &self.roots {
            if (self.probe)(&root.path.join(theme.as_str())) {
                return Resolution {
                    theme,
                    found: true,
                    root: Some(root.clone()),
                };
            }
        }
        Resolution {
            theme,
            found: false,
            root: None,
        }
    }
}

impl std::fmt::Debug for ThemeResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThemeResolver")
            .field("roots", &self.roots)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use pretty_assertions::assert_eq;

    fn color(s: &str) -> AccentColor {
        AccentColor::new(s).unwrap()
    }

    #[test]
    fn empty_accent_values_are_rejected() {
        assert_eq!(AccentColor::new(""), None);
        assert_eq!(AccentColor::new("   "), None);
        assert_eq!(AccentColor::new(" red "), Some(color("red")));
    }

    #[test]
    fn theme_id_derivation_is_total() {
        assert_eq!(ThemeId::from_accent(&color("blue")).as_str(), "Adwaita");
        assert_eq!(ThemeId::from_accent(&color("red")).as_str(), "Adwaita-red");
        assert_eq!(
            ThemeId::from_accent(&color("slate")).as_str(),
            "Adwaita-slate"
        );
    }

    #[test]
    fn default_color_is_found_regardless_of_filesystem() {
        let resolver =
            ThemeResolver::with_probe(vec![IconRoot::user("/nonexistent")], Arc::new(|_| false));
        let resolution = resolver.resolve(&color("blue"));
        assert!(resolution.found);
        assert_eq!(resolution.root, None);
    }

    #[test]
    fn missing_theme_reports_not_found() {
        let resolver = ThemeResolver::with_probe(
            vec![
                IconRoot::system("/usr/share/icons"),
                IconRoot::user("/home/u/.local/share/icons"),
            ],
            Arc::new(|_| false),
        );
        let resolution = resolver.resolve(&color("red"));
        assert!(!resolution.found);
        assert_eq!(resolution.theme.as_str(), "Adwaita-red");
        assert_eq!(resolution.ownership(), None);
    }

    #[test]
    fn system_root_wins_when_both_roots_have_the_theme() {
        let resolver = ThemeResolver::with_probe(
            vec![
                IconRoot::system("/usr/share/icons"),
                IconRoot::user("/home/u/.local/share/icons"),
            ],
            Arc::new(|_| true),
        );
        let resolution = resolver.resolve(&color("green"));
        assert!(resolution.found);
        assert_eq!(resolution.ownership(), Some(Ownership::System));
    }

    #[test]
    fn resolve_is_idempotent_without_filesystem_change() {
        let resolver = ThemeResolver::with_probe(
            vec![IconRoot::user("/icons")],
            Arc::new(|p: &Path| p.ends_with("Adwaita-pink")),
        );
        let first = resolver.resolve(&color("pink"));
        let second = resolver.resolve(&color("pink"));
        assert_eq!(first, second);
        assert!(first.found);
        assert_eq!(first.ownership(), Some(Ownership::User));
    }
}
