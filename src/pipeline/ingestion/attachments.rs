use std::fs;
use std::path::{Path, PathBuf};

use crate::common::constants::IMAGE_EXT;
use crate::common::error::Result;

/// Filesystem home for downloaded message photos.
///
/// Files live at `<images-dir>/<channel>/<message_id>.jpg`; the path recorded on a
/// message is relative to the data root so downstream consumers resolve it without
/// asking the source again.
#[derive(Debug, Clone)]
pub struct AttachmentStore {
    data_root: PathBuf,
    images_dir: PathBuf,
}

impl AttachmentStore {
    pub fn new<P: Into<PathBuf>, Q: Into<PathBuf>>(data_root: P, images_dir: Q) -> Self {
        Self {
            data_root: data_root.into(),
            images_dir: images_dir.into(),
        }
    }

    pub fn images_dir(&self) -> &Path {
        &self.images_dir
    }

    pub fn path_for(&self, channel: &str, message_id: i64) -> PathBuf {
        self.images_dir
            .join(channel)
            .join(format!("{}.{}", message_id, IMAGE_EXT))
    }

    /// Relative path of an already-downloaded attachment, if any
    pub fn existing(&self, channel: &str, message_id: i64) -> Option<String> {
        let path = self.path_for(channel, message_id);
        if path.is_file() {
            Some(self.relative(&path))
        } else {
            None
        }
    }

    /// Write attachment bytes and return the recorded relative path.
    ///
    /// Bytes go to a temporary sibling first and are renamed into place, so a
    /// reader never sees a half-written image.
    pub fn store(&self, channel: &str, message_id: i64, bytes: &[u8]) -> Result<String> {
        let path = self.path_for(channel, message_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension(format!("{}.part", IMAGE_EXT));
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &path)?;
        Ok(self.relative(&path))
    }

    pub fn relative(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.data_root).unwrap_or(path);
        rel.components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/")
    }
}

/// Parse `<images-dir>/<channel>/<message_id>.jpg` back into its key.
pub fn parse_attachment_key(path: &Path) -> Option<(String, i64)> {
    let ext = path.extension()?.to_str()?;
    if !ext.eq_ignore_ascii_case(IMAGE_EXT) {
        return None;
    }
    let message_id = path.file_stem()?.to_str()?.parse::<i64>().ok()?;
    let channel = path.parent()?.file_name()?.to_str()?.to_string();
    Some((channel, message_id))
}
