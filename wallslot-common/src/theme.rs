use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

use crate::error::{ThemeError, ValidationError, WallslotError};
use crate::Result;

/// Folder names under the theme root that are never themes.
const RESERVED_DIRS: [&str; 2] = ["Loaded", "__pycache__"];

const SUPPORTED_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "webp"];

/// Read-only view of `<theme-root>/<ThemeName>/*.{jpg,jpeg,png,webp}`.
#[derive(Debug, Clone)]
pub struct ThemeCatalog {
    root: PathBuf,
}

impl ThemeCatalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Theme folder names, case-insensitively sorted. Folders without any
    /// supported image are left out. A missing root yields no themes.
    pub fn list_themes(&self) -> Result<Vec<String>> {
        if !self.root.is_dir() {
            log::debug!("Theme root {:?} does not exist", self.root);
            return Ok(Vec::new());
        }

        let mut themes = Vec::new();
        for entry in WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(1)
            .follow_links(true)
        {
            let entry = entry.map_err(|e| walk_error(&self.root, e))?;
            if !entry.file_type().is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str() else {
                continue;
            };
            if name.starts_with('.') || RESERVED_DIRS.contains(&name) {
                continue;
            }
            match scan_images(entry.path()) {
                Ok(images) if !images.is_empty() => themes.push(name.to_string()),
                Ok(_) => {}
                Err(e) => log::warn!("Skipping unreadable theme {:?}: {}", entry.path(), e),
            }
        }

        themes.sort_by_key(|name| name.to_lowercase());
        log::debug!("Discovered {} themes in {:?}", themes.len(), self.root);
        Ok(themes)
    }

    /// Images directly inside `theme`, sorted by file name.
    pub fn list_images(&self, theme: &str) -> Result<Vec<PathBuf>> {
        let dir = self.theme_dir(theme)?;
        if !dir.is_dir() {
            return Err(ThemeError::ThemeNotFound {
                name: theme.to_string(),
                path: self.root.clone(),
            }
            .into());
        }
        scan_images(&dir)
    }

    /// Joins a theme-relative image path, refusing anything that could
    /// escape the theme folder.
    pub fn resolve(&self, theme: &str, image_relpath: &str) -> Result<PathBuf> {
        let rel = Path::new(image_relpath);
        if image_relpath.is_empty() || !is_plain_relative(rel) {
            return Err(ValidationError::InvalidImagePath {
                path: rel.to_path_buf(),
            }
            .into());
        }
        Ok(self.theme_dir(theme)?.join(rel))
    }

    /// Splits a path under the theme root into `(theme, image_relpath)`.
    pub fn selection_for(&self, source: &Path) -> Result<(String, String)> {
        let outside = || -> WallslotError {
            ValidationError::OutsideThemeRoot {
                path: source.to_path_buf(),
                theme_root: self.root.clone(),
            }
            .into()
        };

        let rel = source.strip_prefix(&self.root).map_err(|_| outside())?;
        if !is_plain_relative(rel) {
            return Err(outside());
        }
        let mut components = rel.components();
        let theme = components
            .next()
            .and_then(|c| c.as_os_str().to_str())
            .ok_or_else(outside)?
            .to_string();
        let image = components.as_path();
        if image.as_os_str().is_empty() {
            return Err(outside());
        }
        let image = image
            .to_str()
            .ok_or_else(|| ValidationError::InvalidImagePath {
                path: image.to_path_buf(),
            })?
            .to_string();
        Ok((theme, image))
    }

    pub fn is_supported(path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
            .unwrap_or(false)
    }

    pub fn supported_extensions() -> &'static [&'static str] {
        &SUPPORTED_EXTENSIONS
    }

    fn theme_dir(&self, theme: &str) -> Result<PathBuf> {
        let name = Path::new(theme);
        if theme.is_empty() || name.components().count() != 1 || !is_plain_relative(name) {
            return Err(ValidationError::General {
                message: format!("invalid theme name: {:?}", theme),
            }
            .into());
        }
        Ok(self.root.join(name))
    }
}

fn is_plain_relative(path: &Path) -> bool {
    path.components().all(|c| matches!(c, Component::Normal(_)))
}

fn scan_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut images = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).follow_links(true) {
        let entry = entry.map_err(|e| walk_error(dir, e))?;
        if entry.file_type().is_file() && ThemeCatalog::is_supported(entry.path()) {
            images.push(entry.into_path());
        }
    }
    images.sort_by_key(|p| {
        p.file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default()
    });
    Ok(images)
}

fn walk_error(dir: &Path, e: walkdir::Error) -> WallslotError {
    let path = e.path().unwrap_or(dir).to_path_buf();
    let source = e
        .into_io_error()
        .unwrap_or_else(|| std::io::Error::other("filesystem loop"));
    ThemeError::DirectoryRead { path, source }.into()
}
