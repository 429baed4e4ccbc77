mod key;
mod store;

pub use key::{service_id_from_public_key, KeyError, OnionKey};
pub use store::KeyStore;
