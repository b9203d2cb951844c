//! # pw-engine
//!
//! Multi-channel process I/O for external media tools.
//!
//! The engine launches an external executable (ffmpeg, magick, pandoc, ...)
//! and concurrently moves bytes over every data channel the invocation
//! declares — stdin, stdout/stderr capture, and named pipes created on the
//! fly — so that no channel can stall another and no pipe buffer deadlock is
//! possible.
//!
//! This crate provides:
//!
//! - **Invocation orchestration** ([`Engine`]) -- provision channels, launch
//!   the child, pump every channel concurrently, and assemble an
//!   [`InvocationResult`] once everything has settled.
//! - **Channel descriptors** ([`ChannelDescriptor`], [`ChannelSet`]) --
//!   declare inputs and outputs over paths, stdin, or named pipes, with
//!   `{pipe:<name>}` placeholders in the argument list.
//! - **Launch specification** ([`LaunchSpec`]) -- program, arguments, stdio
//!   wiring, timeout, working directory, and environment.
//! - **Command execution** ([`ToolCommand`]) -- async builder with timeout
//!   support for simple argv-in / text-out invocations.
//! - **Tool discovery** ([`ToolRegistry`]) -- find and cache paths to
//!   ffmpeg, ffprobe, magick, mkvmerge, and pandoc.

pub mod channel;
pub mod command;
pub mod engine;
pub mod provision;
pub mod pump;
pub mod supervisor;
pub mod tools;

// ---- Re-exports for convenience ----

pub use channel::{ChannelDescriptor, ChannelSet, Direction};
pub use command::{ToolCommand, ToolOutput};
pub use engine::{ChannelStats, Engine, InvocationResult};
pub use supervisor::{LaunchSpec, StdinMode, StdoutMode};
pub use tools::{ToolConfig, ToolInfo, ToolRegistry};
