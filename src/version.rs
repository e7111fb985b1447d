// Name and version baked in at build time, reported by GET /version and the startup log line.

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name, shared by both binaries.
pub const NAME: &str = env!("CARGO_PKG_NAME");
