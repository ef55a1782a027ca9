pub mod args;
pub mod block_stream;
pub mod core;
pub mod host;
pub mod mmio;
pub mod sdcard;
pub mod storage;

// Re-export commonly used types
pub use args::Args;
pub use block_stream::BlockStream;
pub use core::{EmulatorConfig, EmulatorCore, EmulatorError};
pub use host::{HostError, SpiHost};
pub use mmio::{EmulatorState, SpiState};
pub use sdcard::{SdCard, SdCardError};
pub use storage::{BackingStore, FileStore, MemoryStore};
