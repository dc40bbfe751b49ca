pub mod descriptor;
pub mod selection;

pub use descriptor::{BackupDescriptor, DatabaseDump};
pub use selection::{ContentCategory, ContentSelection};
