//! File data path: slicing on the sender, reassembly on the receiver.

pub mod assembler;
pub mod chunk;
pub mod reader;

pub use assembler::{AssembledFile, FileAssembler};
pub use reader::{ChunkReader, FileHandle, ReadChunk};
