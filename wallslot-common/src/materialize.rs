use image::{DynamicImage, ImageFormat, ImageReader};
use std::collections::HashMap;
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::{MaterializeError, StateError};
use crate::fsutil;
use crate::layout::Slot;
use crate::state::StateStore;
use crate::theme::ThemeCatalog;
use crate::Result;

/// Cooperative cancellation flag shared between a job and its owner.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Converts theme images to PNG at the slot's fixed output path and
/// records the selection. Output file and state change together or not
/// at all.
pub struct Materializer {
    store: Arc<StateStore>,
    catalog: ThemeCatalog,
    commit_locks: Mutex<HashMap<Slot, Arc<Mutex<()>>>>,
}

impl Materializer {
    pub fn new(store: Arc<StateStore>) -> Self {
        let catalog = ThemeCatalog::new(store.paths().theme_root());
        Self {
            store,
            catalog,
            commit_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn catalog(&self) -> &ThemeCatalog {
        &self.catalog
    }

    /// Materializes an image given by path. The path must lie inside a
    /// theme folder so the selection can be recorded relative to it.
    pub fn materialize(&self, slot: Slot, source: &Path) -> Result<PathBuf> {
        if !source.is_file() {
            return Err(MaterializeError::SourceNotFound {
                path: source.to_path_buf(),
            }
            .into());
        }
        let (theme, image_relpath) = self.catalog.selection_for(source)?;
        self.materialize_selection(slot, &theme, &image_relpath, &CancelToken::new())
    }

    pub fn materialize_selection(
        &self,
        slot: Slot,
        theme: &str,
        image_relpath: &str,
        cancel: &CancelToken,
    ) -> Result<PathBuf> {
        let doc = self.store.snapshot();
        if !doc.is_active(slot) {
            return Err(StateError::SlotOutOfRange {
                slot,
                slot_count: doc.slot_count(),
            }
            .into());
        }

        let source = self.catalog.resolve(theme, image_relpath)?;
        if !source.is_file() {
            return Err(MaterializeError::SourceNotFound { path: source }.into());
        }

        log::info!("Materializing {:?} for slot {}", source, slot);
        let png = encode_png(&source)?;
        check_cancelled(slot, cancel)?;

        let lock = self.commit_lock(slot);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        check_cancelled(slot, cancel)?;

        let output = self.store.paths().output_path(slot);
        self.commit(slot, &output, &png, theme, image_relpath)?;
        log::info!("Slot {} written to {:?}", slot, output);
        Ok(output)
    }

    /// Replaces the output file, then records the selection. If recording
    /// fails the previous output is put back.
    fn commit(
        &self,
        slot: Slot,
        output: &Path,
        png: &[u8],
        theme: &str,
        image_relpath: &str,
    ) -> Result<()> {
        let write_failed = |source: io::Error| MaterializeError::WriteFailed {
            path: output.to_path_buf(),
            source,
        };

        let staged = fsutil::stage(output, png).map_err(write_failed)?;
        let backup = fsutil::preserve(output).map_err(write_failed)?;
        if let Err(e) = fsutil::commit(staged, output) {
            fsutil::discard(backup.as_deref());
            return Err(write_failed(e).into());
        }

        match self.store.set_selection(slot, theme, image_relpath) {
            Ok(_) => {
                fsutil::discard(backup.as_deref());
                Ok(())
            }
            Err(e) => {
                log::warn!(
                    "Recording selection for slot {} failed, rolling back output",
                    slot
                );
                if let Err(restore_err) = fsutil::restore(output, backup.as_deref()) {
                    log::error!(
                        "Failed to restore previous output {:?}: {}",
                        output,
                        restore_err
                    );
                }
                Err(e)
            }
        }
    }

    fn commit_lock(&self, slot: Slot) -> Arc<Mutex<()>> {
        let mut locks = self.commit_locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(slot).or_default())
    }
}

fn check_cancelled(slot: Slot, cancel: &CancelToken) -> Result<()> {
    if cancel.is_cancelled() {
        log::debug!("Materialization for slot {} cancelled", slot);
        return Err(MaterializeError::Cancelled { slot }.into());
    }
    Ok(())
}

/// Decodes `source` by content and re-encodes it losslessly as PNG at its
/// own resolution.
fn encode_png(source: &Path) -> Result<Vec<u8>> {
    let unsupported = |message: String| MaterializeError::UnsupportedFormat {
        path: source.to_path_buf(),
        message,
    };
    let not_found = |e: io::Error| {
        log::debug!("Cannot open {:?}: {}", source, e);
        MaterializeError::SourceNotFound {
            path: source.to_path_buf(),
        }
    };

    let reader = ImageReader::open(source)
        .map_err(not_found)?
        .with_guessed_format()
        .map_err(not_found)?;
    if reader.format().is_none() {
        return Err(unsupported("unrecognized image data".to_string()).into());
    }
    let image = reader.decode().map_err(|e| unsupported(e.to_string()))?;

    // The PNG encoder has no floating-point color types.
    let image = match image {
        DynamicImage::ImageRgb32F(_) => DynamicImage::ImageRgb16(image.to_rgb16()),
        DynamicImage::ImageRgba32F(_) => DynamicImage::ImageRgba16(image.to_rgba16()),
        other => other,
    };

    let mut cursor = Cursor::new(Vec::new());
    image
        .write_to(&mut cursor, ImageFormat::Png)
        .map_err(|e| unsupported(e.to_string()))?;
    Ok(cursor.into_inner())
}
