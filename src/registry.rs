//! Namespace Registry
//!
//! Maps namespaces to their fixer chains and target versions, and drives
//! whole-record migration. Producers register before the host locks the
//! registry; after that it is read-only and `migrate` may run on any thread.
//!
//! A record carries one `<namespace>_DataVersion` stamp per namespace. Each
//! namespace upgrades the sub-trees its chain binds, from the stamped version
//! to its target, and every stamp is rewritten once all namespaces succeed.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, warn};

use crate::checksum::RecordSnapshot;
use crate::config::FixerConfig;
use crate::error::{FixerError, Result};
use crate::fixer::rewrite::kind_of;
use crate::fixer::FixerChain;
use crate::version::{read_stamp, stamp_field, write_stamp, DataVersion};

/// One registered namespace
#[derive(Debug)]
pub struct NamespaceEntry {
    namespace: String,
    chain: FixerChain,
    target_version: DataVersion,
}

impl NamespaceEntry {
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn chain(&self) -> &FixerChain {
        &self.chain
    }

    pub fn target_version(&self) -> DataVersion {
        self.target_version
    }
}

/// The main migration registry
#[derive(Debug, Default)]
pub struct Registry {
    /// Entries in registration order
    entries: Vec<NamespaceEntry>,
    index: HashMap<String, usize>,
    locked: AtomicBool,
    config: FixerConfig,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: FixerConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &FixerConfig {
        &self.config
    }

    /// Register (or replace) the chain of a namespace.
    ///
    /// A replaced namespace keeps its original position in migration order.
    pub fn register_fixer(
        &mut self,
        namespace: impl Into<String>,
        target_version: DataVersion,
        chain: FixerChain,
    ) -> Result<()> {
        let namespace = namespace.into();
        if self.is_locked() {
            return Err(FixerError::registration(namespace, "registry is locked"));
        }
        if namespace.is_empty() {
            return Err(FixerError::registration(namespace, "empty namespace"));
        }
        if target_version < 0 {
            return Err(FixerError::registration(
                namespace,
                format!("negative target version {}", target_version),
            ));
        }

        let entry = NamespaceEntry {
            namespace: namespace.clone(),
            chain,
            target_version,
        };
        match self.index.get(&namespace) {
            Some(&i) => {
                info!(%namespace, target_version, "replaced namespace registration");
                self.entries[i] = entry;
            }
            None => {
                debug!(
                    %namespace,
                    target_version,
                    fixers = entry.chain.len(),
                    "registered namespace"
                );
                self.index.insert(namespace, self.entries.len());
                self.entries.push(entry);
            }
        }
        Ok(())
    }

    /// Forbid further registration. Idempotent.
    pub fn lock(&self) {
        if !self.locked.swap(true, Ordering::AcqRel) {
            info!(namespaces = self.entries.len(), "registry locked");
        }
    }

    /// Allow registration again, for teardown and tests
    pub fn unlock(&self) {
        if self.locked.swap(false, Ordering::AcqRel) {
            info!("registry unlocked");
        }
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    pub fn get(&self, namespace: &str) -> Option<&NamespaceEntry> {
        self.index.get(namespace).and_then(|&i| self.entries.get(i))
    }

    /// Namespaces in migration order
    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.namespace.as_str())
    }

    pub fn entries(&self) -> &[NamespaceEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bring a record up to every namespace's target version.
    ///
    /// The input is never modified. On failure no partially migrated record
    /// escapes: the error carries a snapshot of the original input.
    pub fn migrate(&self, record: &Value) -> Result<Value> {
        if self.config.migration.require_lock && !self.is_locked() {
            return Err(FixerError::RegistryNotLocked);
        }

        let mut working = record.clone();
        for entry in &self.entries {
            self.migrate_namespace(entry, &mut working)
                .map_err(|source| abort(entry, record, source))?;
        }

        if let Value::Object(map) = &mut working {
            for entry in &self.entries {
                write_stamp(map, &entry.namespace, entry.target_version);
            }
        }
        Ok(working)
    }

    /// Migrate independent records, one result per record
    pub fn migrate_all<'a, I>(&self, records: I) -> Vec<Result<Value>>
    where
        I: IntoIterator<Item = &'a Value>,
    {
        records.into_iter().map(|record| self.migrate(record)).collect()
    }

    fn migrate_namespace(&self, entry: &NamespaceEntry, record: &mut Value) -> Result<()> {
        let from = match record.as_object() {
            Some(map) => read_stamp(map, &entry.namespace)?,
            None => {
                return Err(FixerError::InvalidStamp {
                    field: stamp_field(&entry.namespace),
                    found: format!("a record that is {}", kind_of(record)),
                })
            }
        };
        let to = entry.target_version;
        if from > to {
            warn!(
                namespace = %entry.namespace,
                stamped = from,
                target = to,
                "record is newer than the registered target; restamping without changes"
            );
            return Ok(());
        }
        if from == to {
            return Ok(());
        }

        for (logical_type, path) in entry.chain.bindings() {
            let Some(slot) = path.get_mut(record) else {
                debug!(
                    namespace = %entry.namespace,
                    %logical_type,
                    %path,
                    "binding absent from record"
                );
                continue;
            };
            let value = std::mem::take(slot);
            *slot = entry.chain.apply(logical_type, value, from, to)?;
        }
        debug!(namespace = %entry.namespace, from, to, "migrated namespace");
        Ok(())
    }
}

fn abort(entry: &NamespaceEntry, record: &Value, source: FixerError) -> FixerError {
    let snapshot = RecordSnapshot::capture(record);
    error!(
        namespace = %entry.namespace,
        record = %snapshot.checksum,
        error = %source,
        "migration aborted"
    );
    FixerError::MigrationAborted {
        namespace: entry.namespace.clone(),
        source: Box::new(source),
        snapshot: Box::new(snapshot),
    }
}
