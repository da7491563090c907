use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, bail, Context, Result};
use genno_contracts::images::{ImageId, ImagePayload};
use genno_contracts::uploads::PreviewHandle;
use image::ImageFormat;

pub const THUMBNAIL_EDGE: u32 = 256;

/// Owner of the display resource behind each upload. Every handle that
/// `allocate` returns must come back through `release` exactly once.
pub trait PreviewStore: Send {
    fn allocate(&mut self, image_id: ImageId, payload: &ImagePayload) -> Result<PreviewHandle>;
    fn release(&mut self, handle: PreviewHandle) -> Result<()>;
    fn live_count(&self) -> usize;
}

#[derive(Debug, Default)]
struct MemoryPreviewState {
    live: HashSet<ImageId>,
    allocated: usize,
    released: usize,
}

/// In-memory store. Clones share counters, so a caller can keep one to watch
/// the store after handing another to a session.
#[derive(Debug, Clone, Default)]
pub struct MemoryPreviewStore {
    state: Arc<Mutex<MemoryPreviewState>>,
}

impl MemoryPreviewStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocated(&self) -> usize {
        self.lock().allocated
    }

    pub fn released(&self) -> usize {
        self.lock().released
    }

    fn lock(&self) -> MutexGuard<'_, MemoryPreviewState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl PreviewStore for MemoryPreviewStore {
    fn allocate(&mut self, image_id: ImageId, _payload: &ImagePayload) -> Result<PreviewHandle> {
        let mut state = self.lock();
        if !state.live.insert(image_id) {
            bail!("preview for image {image_id} is already allocated");
        }
        state.allocated += 1;
        Ok(PreviewHandle::new(image_id, format!("preview://{image_id}")))
    }

    fn release(&mut self, handle: PreviewHandle) -> Result<()> {
        let mut state = self.lock();
        if !state.live.remove(&handle.image_id()) {
            bail!(
                "preview for image {} was already released or never allocated",
                handle.image_id()
            );
        }
        state.released += 1;
        Ok(())
    }

    fn live_count(&self) -> usize {
        self.lock().live.len()
    }
}

/// Writes a small PNG thumbnail per upload into a directory and deletes it on
/// release. Files the `image` crate cannot decode are copied as-is.
#[derive(Debug)]
pub struct ThumbnailPreviewStore {
    dir: PathBuf,
    live: HashMap<ImageId, PathBuf>,
}

impl ThumbnailPreviewStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            live: HashMap::new(),
        }
    }

    fn write_preview(&self, image_id: ImageId, payload: &ImagePayload) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create {}", self.dir.display()))?;
        match image::load_from_memory(&payload.bytes) {
            Ok(decoded) => {
                let path = self.dir.join(format!("preview-{image_id}.png"));
                decoded
                    .thumbnail(THUMBNAIL_EDGE, THUMBNAIL_EDGE)
                    .save_with_format(&path, ImageFormat::Png)
                    .with_context(|| format!("failed to save {}", path.display()))?;
                Ok(path)
            }
            Err(_) => {
                let path = self
                    .dir
                    .join(format!("preview-{image_id}.{}", payload.extension()));
                fs::write(&path, &payload.bytes)
                    .with_context(|| format!("failed to write {}", path.display()))?;
                Ok(path)
            }
        }
    }
}

impl PreviewStore for ThumbnailPreviewStore {
    fn allocate(&mut self, image_id: ImageId, payload: &ImagePayload) -> Result<PreviewHandle> {
        if self.live.contains_key(&image_id) {
            bail!("preview for image {image_id} is already allocated");
        }
        let path = self.write_preview(image_id, payload)?;
        let handle = PreviewHandle::new(image_id, path.display().to_string());
        self.live.insert(image_id, path);
        Ok(handle)
    }

    fn release(&mut self, handle: PreviewHandle) -> Result<()> {
        let path = self.live.remove(&handle.image_id()).ok_or_else(|| {
            anyhow!(
                "preview for image {} was already released or never allocated",
                handle.image_id()
            )
        })?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("failed to delete {}", path.display())),
        }
    }

    fn live_count(&self) -> usize {
        self.live.len()
    }
}
