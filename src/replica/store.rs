//! In-memory replica store
//!
//! Records are keyed by (tenant, class, id). Every write is compared with
//! the stored record using the same dominance relation the coordinator
//! resolves conflicts with.

use crate::common::{ObjectKey, Record, RecordDigest, Result};
use crate::coordinator::resolver::supersedes;
use crate::replica::{DeleteRequest, PutRequest, WriteAck, WriteMode};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

type Slot = (Option<String>, ObjectKey);

#[derive(Debug, Default)]
pub struct ReplicaStore {
    records: RwLock<HashMap<Slot, Record>>,
}

impl ReplicaStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(key: &ObjectKey, tenant: Option<&str>) -> Slot {
        (tenant.map(str::to_string), key.clone())
    }

    /// Stored record, tombstones included
    pub fn get(&self, key: &ObjectKey, tenant: Option<&str>) -> Option<Record> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        records.get(&Self::slot(key, tenant)).cloned()
    }

    pub fn digest(&self, key: &ObjectKey, tenant: Option<&str>) -> Option<RecordDigest> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        records.get(&Self::slot(key, tenant)).map(Record::digest)
    }

    /// Live object check, as a single-node read would answer it
    pub fn exists(&self, key: &ObjectKey, tenant: Option<&str>) -> bool {
        matches!(self.get(key, tenant), Some(Record::Live(_)))
    }

    /// Apply a put. Update and merge require a live object on this node.
    pub fn put(&self, req: PutRequest) -> Result<WriteAck> {
        let key = req.object.key();
        let slot = Self::slot(&key, req.tenant.as_deref());
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let existing = records.get(&slot);

        let incoming = match req.mode {
            WriteMode::Upsert => req.object,
            WriteMode::Update | WriteMode::Merge => {
                let current = match existing {
                    Some(Record::Live(current)) => current,
                    _ => return Err(crate::Error::NotFound(key.to_string())),
                };
                let mut obj = req.object;
                obj.created_at = current.created_at;
                if req.mode == WriteMode::Merge {
                    let mut properties = current.properties.clone();
                    properties.append(&mut obj.properties);
                    obj.properties = properties;
                    if obj.vector.is_none() {
                        obj.vector = current.vector.clone();
                    }
                    for (name, vector) in &current.vectors {
                        obj.vectors
                            .entry(name.clone())
                            .or_insert_with(|| vector.clone());
                    }
                }
                obj
            }
        };

        if let Some(current) = existing {
            if !supersedes(req.strategy, &incoming.digest(), &current.digest()) {
                return Ok(WriteAck {
                    applied: false,
                    version: current.version(),
                });
            }
        }

        let version = incoming.last_update;
        records.insert(slot, Record::Live(incoming));
        Ok(WriteAck {
            applied: true,
            version,
        })
    }

    /// Record a tombstone unless the stored record supersedes it
    pub fn delete(&self, req: DeleteRequest) -> WriteAck {
        let slot = Self::slot(&req.key, req.tenant.as_deref());
        let tombstone = RecordDigest::tombstone(req.version);
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(current) = records.get(&slot) {
            if !supersedes(req.strategy, &tombstone, &current.digest()) {
                return WriteAck {
                    applied: false,
                    version: current.version(),
                };
            }
        }

        records.insert(
            slot,
            Record::Tombstone {
                deleted_at: req.version,
            },
        );
        WriteAck {
            applied: true,
            version: req.version,
        }
    }

    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
