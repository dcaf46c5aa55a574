pub mod bucket_page;
pub mod codec;
pub mod directory_page;
pub mod error;
pub mod extendible;

pub use codec::{DefaultKeyHasher, IdentityHasher, KeyHasher, Storable};
pub use error::HashTableError;
pub use extendible::ExtendibleHashTable;
