// Work Items

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Anything a queue can carry.
///
/// Queues that cross a durability boundary store the `serde_json` encoding;
/// unique queues use that same encoding as the item's identity.
pub trait Item: Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> Item for T where T: Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Encode an item to its stored form (and unique identity)
pub fn encode<T: Item>(item: &T) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(item)
}

/// Decode an item from its stored form
pub fn decode<T: Item>(bytes: &[u8]) -> serde_json::Result<T> {
    serde_json::from_slice(bytes)
}
