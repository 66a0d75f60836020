use std::time::Duration;

use crate::error::Result;
use crate::store::Store;
use crate::util;

use super::keys::ChannelKeys;

/// Creates stream id records and answers membership queries.
///
/// A registered id is an empty payload key with a TTL; everything else about
/// a stream hangs off that key's existence.
pub struct Registrar {
    store: Store,
    channel_expire: Duration,
}

impl Registrar {
    pub fn new(store: Store, channel_expire: Duration) -> Self {
        Self {
            store,
            channel_expire,
        }
    }

    pub fn register(&self, id: &str) -> Result<()> {
        let keys = ChannelKeys::new(id);
        if let Err(err) = self.store.set_ex(keys.payload(), self.channel_expire, &[]) {
            util::count_with_data("registrar.register.error", &format!("error={err}"));
            return Err(err);
        }
        Ok(())
    }

    /// Store errors answer false; they are counted, not surfaced.
    pub fn is_registered(&self, id: &str) -> bool {
        let keys = ChannelKeys::new(id);
        match self.store.exists(keys.payload()) {
            Ok(registered) => registered,
            Err(err) => {
                util::count_with_data("registrar.is_registered.error", &format!("error={err}"));
                false
            }
        }
    }
}
