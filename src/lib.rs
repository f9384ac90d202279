//! Crate root tying the workspace together: re-exports the pieces an
//! embedder needs to stand up the engine and its HTTP adapter without
//! depending on the member crates directly.

pub use broker_core as core;
pub use broker_http as http;
pub use broker_shared as shared;
