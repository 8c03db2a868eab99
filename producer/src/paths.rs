//! Session-scoped scratch directories.
//!
//! Each producer process gets one temp directory (staged assets, File-mode
//! frame hand-off) and a family of save directories (recordings, snapshots),
//! all under the system temp root. Names carry a random session tag so
//! concurrent producers never collide.

use std::{
    fs,
    path::{Path, PathBuf},
};

use log::info;

/// Name of the subdirectory renderables stage texture/mesh files into.
pub const ASSET_DIR_NAME: &str = "scene_assets";

pub(crate) struct SessionPaths {
    tag: Option<String>,
    temp: Option<PathBuf>,
    save_count: u32,
}

impl SessionPaths {
    pub(crate) fn new() -> Self {
        Self {
            tag: None,
            temp: None,
            save_count: 0,
        }
    }

    fn tag(&mut self) -> String {
        if let Some(tag) = &self.tag {
            return tag.clone();
        }
        let base = std::env::temp_dir().join("limn").join("tmp");
        let mut tag = format!("session_{:08x}", fastrand::u32(..));
        while base.join(&tag).exists() {
            tag = format!("session_{:08x}", fastrand::u32(..));
        }
        info!("Session tag: {tag}");
        self.tag = Some(tag.clone());
        tag
    }

    /// The process-wide temp directory, created on first use.
    pub(crate) fn temp_dir(&mut self) -> PathBuf {
        if let Some(temp) = &self.temp {
            return temp.clone();
        }
        let tag = self.tag();
        let dir = std::env::temp_dir().join("limn").join("tmp").join(tag);
        create_if_missing(&dir);
        info!("Temp folder: {}", dir.display());
        self.temp = Some(dir.clone());
        dir
    }

    /// Staged-asset directory inside the temp directory.
    pub(crate) fn asset_dir(&mut self) -> PathBuf {
        self.temp_dir().join(ASSET_DIR_NAME)
    }

    /// A fresh save directory; every call returns a new one.
    pub(crate) fn save_dir(&mut self) -> PathBuf {
        let tag = self.tag();
        self.save_count += 1;
        let mut dir = std::env::temp_dir().join("limn").join("save").join(&tag);
        if self.save_count > 1 {
            dir = dir.with_file_name(format!("{tag}_{}", self.save_count));
        }
        create_if_missing(&dir);
        info!("Save folder: {}", dir.display());
        dir
    }
}

fn create_if_missing(dir: &Path) {
    if !dir.exists() {
        if let Err(err) = fs::create_dir_all(dir) {
            panic!("Could not create session directory {}: {err}", dir.display());
        }
    }
}
