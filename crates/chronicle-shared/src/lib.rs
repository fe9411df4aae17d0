//! Types, wire schema and crypto shared by every Chronicle crate.

pub mod constants;
pub mod crypto;
pub mod encryptor;
pub mod error;
pub mod identity;
pub mod protocol;
pub mod types;

pub use encryptor::{Encryptor, HashRatchetEncryptor};
pub use error::{CryptoError, IdentityError, SharedError};
pub use types::{CommunityId, Message, TopicType};
