//! Child-process plumbing.
//!
//! - `codec`: newline framing with a maximum line length.
//! - `handle`: spawning, stdio pumps, exit supervision, and termination.

pub mod codec;
pub mod handle;

pub use codec::{FrameCodec, MAX_LINE_BYTES};
pub use handle::{EnvPolicy, ProcessEvent, ProcessHandle, ProcessSpec, StdinWriter};
