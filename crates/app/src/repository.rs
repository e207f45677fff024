//! Typed repositories over the storage port.

mod read;
mod write;

pub use read::EngineReadRepository;
pub use write::WriteRepository;
