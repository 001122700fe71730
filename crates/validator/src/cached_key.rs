//! The cached projection stored at `api_key:{keyValue}` — the key and
//! its group's status bundled together so a cache hit never needs a
//! second round trip (spec §4.1 step 1).

use aicarpool_core::{ClientApiKey, Group};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedKey {
    pub key: ClientApiKey,
    pub group: Group,
}
