//! Reference tools for the Wheelhouse engine: shell execution,
//! workspace-rooted file operations, and the transparent batch wrapper.
//!
//! Each tool implements [`wh_engine::Tool`]; register the set you want on
//! a [`wh_engine::ToolRegistry`].

pub mod batch;
pub mod exec;
pub mod file_ops;

pub use batch::BatchTool;
pub use exec::ExecTool;
pub use file_ops::{FileListTool, FileReadTool, FileWriteTool};
