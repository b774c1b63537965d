pub mod passage_cache;

pub use passage_cache::PassageCache;
