pub mod closer;
pub mod codec;
pub mod concur;
pub mod crypto;
pub mod error;
pub mod hashing;
pub mod pipe;
pub mod pipeline;
pub mod repository;
pub mod storage;
pub mod stream;

pub use closer::MultiCloser;
pub use codec::{Compressor, Decompressor, GzipCompressor, ZstdCompressor, compressor_by_name};
pub use crypto::{ChunkedGcmCrypter, Crypter, KdfParams, crypter_by_name};
pub use error::{Error, Result};
pub use repository::Repository;
pub use storage::{MemoryStorage, Storage, StorageType};
pub use stream::{Close, ObjectReader};
