//! Copying objects between transactions.
//!
//! The typical use is detaching object state into a snapshot transaction
//! so it outlives the originating transaction; any pair of transactions
//! over the same schema catalog works.

use std::sync::Arc;

use strata_error::{Result, StrataError};
use strata_types::{key_after_prefix, keys, ObjId};
use tracing::debug;

use crate::tx::Transaction;

impl Transaction {
    /// Reproduce one object (content keys, metadata and index entries)
    /// inside `dest`, replacing any existing state it holds for the same
    /// id. Returns true if the object did not previously exist there.
    ///
    /// The object is first migrated to this transaction's target version;
    /// it lands in `dest` recorded at that version and migrates lazily
    /// there if the destination targets a different one. Only the
    /// destination's listeners observe the copy (a create notification
    /// when the object is new there); the source is only read.
    pub fn copy_object(&self, id: ObjId, dest: &Transaction) -> Result<bool> {
        self.check_usable()?;
        dest.check_writable()?;
        self.require_meta(id)?;
        self.ensure_current(id)?;

        // The destination must know the version the copy is recorded
        // under, or it could never migrate or delete it.
        if dest.catalog.get(self.schema.version()).is_none() {
            return Err(StrataError::invalid_schema(format!(
                "destination transaction has no recorded schema version {}",
                self.schema.version()
            )));
        }

        let existed = dest.exists(id)?;
        if existed {
            // Replace silently: clear the previous incarnation's index
            // entries and content without delete dispositions.
            let meta = dest.require_meta(id)?;
            let recorded = dest.recorded_schema(meta.version)?;
            dest.remove_index_entries_for_object(&recorded, id)?;
        }
        let prefix = keys::obj_prefix(id);
        let end = key_after_prefix(&prefix);
        dest.kv_remove_range(&prefix, end.as_deref())?;

        for pair in self.kv_get_range(&prefix, end.as_deref(), false)? {
            dest.kv_put(pair.key, pair.value)?;
        }

        let schema = Arc::clone(&self.schema);
        dest.add_index_entries_for_object(&schema, id)?;

        // Keep the destination's allocator ahead of the copied id so a
        // later create cannot hand the same id out again.
        let type_id = id.storage_id()?;
        let sequence = obj_sequence(id)?;
        dest.reserve_sequence(type_id, sequence)?;

        debug!(id = %id, existed, "copied object between transactions");
        if !existed {
            dest.notify_create(id)?;
        }
        Ok(!existed)
    }
}

/// The per-type sequence number packed into an id's trailing bytes.
fn obj_sequence(id: ObjId) -> Result<u64> {
    let prefix_len = id.storage_id()?.encoded_len();
    let mut sequence: u64 = 0;
    for &byte in &id.as_bytes()[prefix_len..] {
        sequence = (sequence << 8) | u64::from(byte);
    }
    Ok(sequence)
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_types::StorageId;

    #[test]
    fn sequence_extraction() {
        let type_id = StorageId::new(100).unwrap();
        let id = ObjId::new(type_id, 0x0102).unwrap();
        assert_eq!(obj_sequence(id).unwrap(), 0x0102);

        let wide_type = StorageId::new(300).unwrap();
        let id = ObjId::new(wide_type, 7).unwrap();
        assert_eq!(obj_sequence(id).unwrap(), 7);
    }
}
