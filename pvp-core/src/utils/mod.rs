pub mod backoff;
pub mod signature_cache;

pub use backoff::Backoff;
pub use signature_cache::SignatureCache;
