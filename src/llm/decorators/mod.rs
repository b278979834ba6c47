/// LLM decorators that wrap a base provider and add behavior to it.
///
/// Each decorator implements the `LLM` trait itself and forwards to the
/// provider it wraps, so decorators stack freely.
pub mod retry;

pub use retry::RetryingLLM;
