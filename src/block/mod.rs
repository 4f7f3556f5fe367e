pub mod cache;
pub mod wrapper;

pub use cache::{CacheError, ChainCache};
pub use wrapper::{Decision, VerifyMode, Wrapper, WrapperError};
