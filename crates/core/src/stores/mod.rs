pub mod fs;

pub use fs::FsIndexStore;
