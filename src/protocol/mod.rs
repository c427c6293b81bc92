//! Wire protocol types.
//!
//! This module defines the framing and the control messages exchanged
//! with the bridge.
//!
//! # Protocol Overview
//!
//! | Piece | Description |
//! |-------|-------------|
//! | Frame | `"<channel>\n<payload>"`, empty channel = control |
//! | Control | JSON object keyed by `command` |
//! | Problem | Failure code carried by `close` |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `control` | Control message sum type |
//! | `frame` | Wire codec |
//! | `problem` | Close problem codes |

// ============================================================================
// Submodules
// ============================================================================

/// Control message sum type.
pub mod control;

/// Wire codec.
pub mod frame;

/// Close problem codes.
pub mod problem;

// ============================================================================
// Re-exports
// ============================================================================

pub use control::{Control, Init, PROTOCOL_VERSION};
pub use frame::{Frame, Payload, WireMessage, decode, encode, encode_control};
pub use problem::Problem;
