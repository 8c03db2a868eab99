use std::{collections::HashMap, path::PathBuf};

use limn_shared::DEFAULT_PORT;
use serde_json::{json, Value};

/// Initial layout of a window. Negative sizes/positions mean "let the viewer
/// decide".
#[derive(Clone, Debug)]
pub struct WindowOptions {
    pub width: f32,
    pub height: f32,
    /// Position of the upper-left window corner along the x-axis.
    pub x_position: f32,
    /// Position of the upper-left window corner along the y-axis.
    pub y_position: f32,
    pub title: String,
}

impl Default for WindowOptions {
    fn default() -> Self {
        Self {
            width: -1.0,
            height: -1.0,
            x_position: -1.0,
            y_position: -1.0,
            title: "show".to_string(),
        }
    }
}

impl WindowOptions {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn sized(width: f32, height: f32) -> Self {
        Self {
            width,
            height,
            ..Self::default()
        }
    }
}

/// Where a concurrent on-disk capture goes. `path: None` records into a
/// fresh session save directory.
#[derive(Clone, Debug, Default)]
pub struct RecordConfig {
    pub path: Option<PathBuf>,
}

impl RecordConfig {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }
}

/// Options for producer-connects-out topology.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Block until the viewer accepts before returning.
    pub blocking: bool,
    pub host: String,
    pub port: u16,
    /// Also capture everything sent, per connection.
    pub record: Option<RecordConfig>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            blocking: false,
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            record: None,
        }
    }
}

/// Options for producer-listens topology.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Block until the first viewer connects before returning.
    pub blocking: bool,
    pub port: u16,
    /// Also capture everything sent, per connection.
    pub record: Option<RecordConfig>,
    /// App description + flags advertised to connecting viewers.
    pub metadata: Metadata,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            blocking: false,
            port: DEFAULT_PORT,
            record: None,
            metadata: Metadata::default(),
        }
    }
}

/// One viewer-togglable flag. Toggle flags mirror the viewer's state;
/// momentary flags latch true until consumed by the producer.
#[derive(Clone, Copy, Debug, Default)]
pub struct Flag {
    pub toggle: bool,
    pub state: bool,
}

/// App metadata advertised to viewers: a display name plus the flag set the
/// viewer renders as controls.
#[derive(Clone, Debug, Default)]
pub struct Metadata {
    pub app_name: String,
    pub flags: HashMap<String, Flag>,
}

impl Metadata {
    pub fn named(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            flags: HashMap::new(),
        }
    }

    pub fn with_flag(mut self, name: impl Into<String>, toggle: bool) -> Self {
        self.flags.insert(
            name.into(),
            Flag {
                toggle,
                state: false,
            },
        );
        self
    }

    pub(crate) fn serialize(&self) -> Value {
        let flags: Vec<Value> = self
            .flags
            .iter()
            .map(|(name, flag)| {
                json!({
                    "name": name,
                    "toggle": flag.toggle,
                    "state": flag.state,
                })
            })
            .collect();
        json!({
            "type": "metadata",
            "name": self.app_name,
            "flags": flags,
        })
    }
}
