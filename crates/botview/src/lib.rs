//! Umbrella crate for Botview.
//!
//! This crate is intentionally small: it re-exports the engine and protocol crates
//! so the desktop shell can depend on a single crate name (`botview`).

pub use botview_engine as engine;
pub use botview_protocol as protocol;
