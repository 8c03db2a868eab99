mod window;


/// Identifies a window within one producer process.
pub type WindowId = i32;

pub use window::{Window, WindowEvents};
