pub mod fs;

pub use fs::NativeFileSystem;
