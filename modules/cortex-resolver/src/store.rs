//! The entity store: the only writable copy of canonical entities and the
//! identifier index. Writers go through the resolver's lock; readers get
//! cloned snapshots.

use std::collections::{BTreeSet, HashMap};

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use cortex_common::normalize::normalize_name;
use cortex_common::{Entity, EntityType, IdentifierKey, Signal};

/// Outcome of an entity merge, for the audit trail.
#[derive(Debug, Clone)]
pub struct MergeRecord {
    pub survivor: Uuid,
    pub retired: Uuid,
    pub reason: String,
}

#[derive(Default)]
pub struct EntityStore {
    entities: HashMap<Uuid, Entity>,
    identifier_index: HashMap<(IdentifierKey, String), Uuid>,
    /// Retired id → survivor id. Entities are never destroyed; a merged id
    /// keeps resolving to its survivor.
    retired: HashMap<Uuid, Uuid>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Follow retirement redirects to the live id.
    pub fn canonical_id(&self, id: Uuid) -> Uuid {
        let mut current = id;
        while let Some(&next) = self.retired.get(&current) {
            current = next;
        }
        current
    }

    pub fn get(&self, id: Uuid) -> Option<&Entity> {
        self.entities.get(&self.canonical_id(id))
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn lookup_identifier(&self, key: IdentifierKey, value: &str) -> Option<Uuid> {
        self.identifier_index
            .get(&(key, value.to_string()))
            .map(|&id| self.canonical_id(id))
    }

    /// Case-insensitive canonical-name lookup (used by the assisted tier).
    pub fn find_by_canonical_name(&self, name: &str) -> Option<Uuid> {
        let wanted = name.to_lowercase();
        self.entities
            .values()
            .find(|e| e.canonical_name.to_lowercase() == wanted)
            .map(|e| e.id)
    }

    /// Exact lookup on a normalized alias (create-path recheck).
    pub fn find_by_alias(&self, normalized: &str) -> Option<Uuid> {
        self.entities
            .values()
            .find(|e| e.aliases.contains(normalized))
            .map(|e| e.id)
    }

    /// Create a new entity seeded from a signal's descriptor. The caller has
    /// already established that no identifier conflicts exist.
    pub fn create(&mut self, entity_type: EntityType, name: &str, signal: Signal) -> Uuid {
        let now = Utc::now();
        let id = Uuid::new_v4();
        let mut aliases = BTreeSet::new();
        aliases.insert(normalize_name(name));

        let identifiers = signal.entity.identifiers.clone();
        for (key, value) in &identifiers {
            self.identifier_index.insert((*key, value.clone()), id);
        }

        self.entities.insert(
            id,
            Entity {
                id,
                entity_type,
                canonical_name: name.to_string(),
                aliases,
                identifiers,
                signals: vec![signal],
                confidence: 0.5,
                created_at: now,
                updated_at: now,
            },
        );
        id
    }

    /// Append a signal to an entity, keeping the signal list ordered by
    /// observed_at. Idempotent by signal id: a repeat append is a no-op.
    /// Returns whether the signal was actually added.
    pub fn append_signal(&mut self, entity_id: Uuid, signal: Signal) -> bool {
        let entity_id = self.canonical_id(entity_id);
        let Some(entity) = self.entities.get_mut(&entity_id) else {
            return false;
        };
        if entity.signals.iter().any(|s| s.id == signal.id) {
            return false;
        }

        let alias = normalize_name(&signal.entity.name);
        if !alias.is_empty() {
            entity.aliases.insert(alias);
        }

        // Insert at the sorted position so the list stays monotone even when
        // an old observation arrives late.
        let at = entity
            .signals
            .partition_point(|s| s.observed_at <= signal.observed_at);
        entity.signals.insert(at, signal);
        entity.updated_at = Utc::now();
        entity.confidence = (entity.confidence + 0.05).min(0.99);
        true
    }

    /// Bind an identifier to an entity. Returns the conflicting entity id if
    /// the value already maps to a different live entity.
    pub fn bind_identifier(
        &mut self,
        entity_id: Uuid,
        key: IdentifierKey,
        value: &str,
    ) -> Result<(), Uuid> {
        let entity_id = self.canonical_id(entity_id);
        if let Some(existing) = self.lookup_identifier(key, value) {
            if existing != entity_id {
                return Err(existing);
            }
            return Ok(());
        }
        self.identifier_index
            .insert((key, value.to_string()), entity_id);
        if let Some(entity) = self.entities.get_mut(&entity_id) {
            entity.identifiers.insert(key, value.to_string());
            entity.updated_at = Utc::now();
        }
        Ok(())
    }

    /// Merge two entities. The older record survives (ties: larger signal
    /// count, then smaller id bytes); the other is retired and its aliases,
    /// identifiers, and signals are folded in and reindexed.
    pub fn merge(&mut self, a: Uuid, b: Uuid, reason: &str) -> Option<MergeRecord> {
        let a = self.canonical_id(a);
        let b = self.canonical_id(b);
        if a == b {
            return None;
        }
        let (ea, eb) = (self.entities.get(&a)?, self.entities.get(&b)?);

        let a_survives = match ea.created_at.cmp(&eb.created_at) {
            std::cmp::Ordering::Less => true,
            std::cmp::Ordering::Greater => false,
            std::cmp::Ordering::Equal => match ea.signals.len().cmp(&eb.signals.len()) {
                std::cmp::Ordering::Greater => true,
                std::cmp::Ordering::Less => false,
                std::cmp::Ordering::Equal => ea.id.as_bytes() <= eb.id.as_bytes(),
            },
        };
        let (survivor_id, retired_id) = if a_survives { (a, b) } else { (b, a) };

        let retired = self.entities.remove(&retired_id)?;
        let survivor = self
            .entities
            .get_mut(&survivor_id)
            .expect("survivor looked up above");

        survivor.aliases.extend(retired.aliases);
        survivor
            .aliases
            .insert(normalize_name(&retired.canonical_name));
        for (key, value) in retired.identifiers {
            self.identifier_index
                .insert((key, value.clone()), survivor_id);
            survivor.identifiers.entry(key).or_insert(value);
        }
        for signal in retired.signals {
            if !survivor.signals.iter().any(|s| s.id == signal.id) {
                let at = survivor
                    .signals
                    .partition_point(|s| s.observed_at <= signal.observed_at);
                survivor.signals.insert(at, signal);
            }
        }
        survivor.confidence = survivor.confidence.max(retired.confidence);
        survivor.updated_at = Utc::now();

        self.retired.insert(retired_id, survivor_id);

        info!(
            survivor = %survivor_id,
            retired = %retired_id,
            reason,
            "Merged entities"
        );
        Some(MergeRecord {
            survivor: survivor_id,
            retired: retired_id,
            reason: reason.to_string(),
        })
    }
}
