//! OCR3 Storage Layer
//!
//! Implementations of [`ocr3_core::Database`]:
//!
//! - **MemoryDatabase**: `parking_lot`-guarded maps, for tests and simulations
//! - **FileDatabase**: one JSON file per certificate slot, atomic via rename

#![deny(missing_docs)]
#![deny(unsafe_code)]

pub mod file;
pub mod memory;

// Re-exports for convenience
pub use file::FileDatabase;
pub use memory::MemoryDatabase;
