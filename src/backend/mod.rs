pub mod archive;
pub mod bookmarks;
pub mod cache;
pub mod config;
pub mod error;
pub mod jumpmarks;
pub mod session;
