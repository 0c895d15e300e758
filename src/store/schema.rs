//! Schema version bookkeeping and migrations for the durable store
//!
//! There is exactly one migration today (the initial schema); the match in
//! [`migrate`] is the seam future migrations hang off of, keyed on the
//! version recorded in the `meta` tree so opening an existing store is
//! idempotent.

use tracing::info;

use crate::error::{MemoryError, Result};

const SCHEMA_VERSION_KEY: &[u8] = b"schema_version";
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

pub fn migrate(meta: &sled::Tree) -> Result<()> {
    let stored = meta
        .get(SCHEMA_VERSION_KEY)?
        .map(|v| {
            <[u8; 4]>::try_from(v.as_ref())
                .map(u32::from_be_bytes)
                .map_err(|_| MemoryError::Storage("corrupt schema_version entry".into()))
        })
        .transpose()?
        .unwrap_or(0);

    if stored > CURRENT_SCHEMA_VERSION {
        return Err(MemoryError::Storage(format!(
            "durable store schema version {stored} is newer than this build supports ({CURRENT_SCHEMA_VERSION})"
        )));
    }

    let mut version = stored;
    while version < CURRENT_SCHEMA_VERSION {
        version += 1;
        info!(to = version, "migrating durable store schema");
        // No migrations exist yet beyond the initial schema: trees are
        // created lazily by `DurableStore::open`, so version 1 needs no
        // data transformation.
    }

    if version != stored {
        meta.insert(SCHEMA_VERSION_KEY, &version.to_be_bytes())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_store_migrates_to_current_version() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let meta = db.open_tree("meta").unwrap();
        migrate(&meta).unwrap();
        let stored = meta.get(SCHEMA_VERSION_KEY).unwrap().unwrap();
        assert_eq!(u32::from_be_bytes(stored.as_ref().try_into().unwrap()), CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn rejects_future_schema_version() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let meta = db.open_tree("meta").unwrap();
        meta.insert(SCHEMA_VERSION_KEY, &(CURRENT_SCHEMA_VERSION + 1).to_be_bytes())
            .unwrap();
        assert!(migrate(&meta).is_err());
    }
}
