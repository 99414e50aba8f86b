//! Built-in tool plugins.
//!
//! Three plugins ship with the engine and cover the operations the stock
//! board templates rely on:
//!
//! - [`filesystem`] — sandboxed file access within a workspace root
//! - [`shell`] — command execution with a denylist and timeout
//! - [`tasklist`] — the per-hex task store agents claim work from
//!
//! Each declares per-operation permission requirements that the RBAC
//! dispatch enforces before any call reaches the plugin.

pub mod filesystem;
pub mod shell;
pub mod tasklist;

pub use filesystem::FilesystemPlugin;
pub use shell::ShellPlugin;
pub use tasklist::{Task, TaskPriority, TaskStatus, TaskStore, TasklistPlugin};
