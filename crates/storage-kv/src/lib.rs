//! Key-value engine for the offline store (fallback where SQLite is not an
//! option). See [`backend::KvBackend`].

pub mod backend;

pub use backend::KvBackend;
