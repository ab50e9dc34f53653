//! Local content store for pulled and tagged images

pub mod layout;
pub mod store;

pub use layout::{CurrentEncoding, EncodingStrategy, LegacyEncoding, Layout};
pub use store::ImageStore;
