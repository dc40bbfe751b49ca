//! Archive codec: packs a directory subtree into a single compressed tar
//! archive with selective content inclusion, and unpacks it back out with
//! path-traversal hardening.

pub mod pack;
pub mod unpack;

pub use pack::{pack, PackSummary};
pub use unpack::{unpack, UnpackSummary};

/// Application tree content lives under this prefix inside the archive.
pub const APP_PREFIX: &str = "app";

/// Hook-produced database dump artifacts live under this prefix, so a dump
/// file can never collide with an application path.
pub const DB_PREFIX: &str = "databases";
