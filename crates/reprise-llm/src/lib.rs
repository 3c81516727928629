pub mod backend;
pub mod sse;

pub mod mock;

pub use backend::OpenAiBackend;
pub use mock::{MockBackend, MockResponse};
