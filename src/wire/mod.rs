//! Length-prefixed framing protocol between the Executor (host) and the
//! Sandbox Runner (child process), and the typed payloads that ride it.

pub mod frame;
pub mod message;

pub use frame::{read_frame, write_frame};
pub use message::{Command, Response, SubCallRequest, SubCallResponse};
