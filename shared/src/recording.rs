//! On-disk form of a hybrid-message sequence.
//!
//! A recording root contains one numbered subdirectory per message, each
//! holding the header as `msg.json` plus `msg_buf_<i>` payload files, and a
//! top-level `meta.json` index listing message numbers in order. Viewers
//! replay recordings with the same scene machinery they use for live
//! connections.

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use serde_json::{json, Value};
use thiserror::Error;

/// Errors while writing a recording to disk.
#[derive(Debug, Error)]
pub enum RecordingError {
    /// Filesystem failure at a specific path
    #[error("Failed to write recording path {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Message header could not be serialized
    #[error("Failed to encode recording header: {0}")]
    HeaderEncode(#[from] serde_json::Error),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> RecordingError + '_ {
    move |source| RecordingError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Write one hybrid message into `dir` (`msg.json` + `msg_buf_<i>`).
pub fn write_message_dir(
    dir: &Path,
    header: &Value,
    payloads: &[Vec<u8>],
) -> Result<(), RecordingError> {
    fs::create_dir_all(dir).map_err(io_err(dir))?;

    for (index, payload) in payloads.iter().enumerate() {
        let path = dir.join(format!("msg_buf_{index}"));
        let mut file = fs::File::create(&path).map_err(io_err(&path))?;
        file.write_all(payload).map_err(io_err(&path))?;
    }

    let header_path = dir.join("msg.json");
    let header_text = serde_json::to_string(header)?;
    fs::write(&header_path, header_text).map_err(io_err(&header_path))?;

    Ok(())
}

/// Appends messages as numbered subdirectories under a root, keeping the
/// `meta.json` index current after every append.
pub struct RecordingWriter {
    root: PathBuf,
    indices: Vec<u64>,
}

impl RecordingWriter {
    /// Open a recording root, creating the directory tree as needed.
    /// Whether an existing root is acceptable is the caller's policy.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, RecordingError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(io_err(&root))?;
        Ok(Self {
            root,
            indices: Vec::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of messages written so far.
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Write the next message in the sequence, returning its number.
    pub fn append(&mut self, header: &Value, payloads: &[Vec<u8>]) -> Result<u64, RecordingError> {
        let index = self.indices.last().map(|last| last + 1).unwrap_or(0);
        let dir = self.root.join(index.to_string());
        write_message_dir(&dir, header, payloads)?;
        self.indices.push(index);
        self.write_meta()?;
        Ok(index)
    }

    fn write_meta(&self) -> Result<(), RecordingError> {
        let meta = json!({ "messages": self.indices });
        let path = self.root.join("meta.json");
        fs::write(&path, meta.to_string()).map_err(io_err(&path))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("limn-recording-{}-{name}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn layout_matches_contract() {
        let root = scratch_dir("layout");
        let mut writer = RecordingWriter::new(&root).expect("create writer");

        writer
            .append(&json!({"type": "scene", "data": {}}), &[vec![1, 2, 3]])
            .expect("append 0");
        writer
            .append(&json!({"type": "scene", "data": {}}), &[])
            .expect("append 1");

        assert!(root.join("0").join("msg.json").is_file());
        assert!(root.join("0").join("msg_buf_0").is_file());
        assert!(root.join("1").join("msg.json").is_file());
        assert!(!root.join("1").join("msg_buf_0").exists());

        let meta: Value =
            serde_json::from_str(&fs::read_to_string(root.join("meta.json")).unwrap()).unwrap();
        assert_eq!(meta["messages"], json!([0, 1]));

        assert_eq!(fs::read(root.join("0").join("msg_buf_0")).unwrap(), vec![1, 2, 3]);

        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn message_numbers_are_sequential() {
        let root = scratch_dir("sequence");
        let mut writer = RecordingWriter::new(&root).expect("create writer");
        for expected in 0..4 {
            let index = writer.append(&json!({"type": "scene"}), &[]).unwrap();
            assert_eq!(index, expected);
        }
        assert_eq!(writer.len(), 4);
        let _ = fs::remove_dir_all(&root);
    }
}
