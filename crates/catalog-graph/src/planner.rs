//! Mutation planning: turns one entity edit into the full set of document
//! patches that keep every embedded summary and reverse id list consistent.
//!
//! Planning is split in two so the plan itself stays a pure function:
//! [`MutationPlanner::required_lookups`] names the partner entities whose
//! summaries are needed, the caller resolves them (see
//! [`crate::ChunkedQueryExecutor`]), and [`MutationPlanner::plan`] derives the
//! patches from the input and the resolved [`SummaryIndex`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

use catalog_cache::AffectedPages;
use catalog_core::{
    fields, ids_to_value, project_summary, summary_to_value, CatalogError, DocumentKey, EntityId,
    EntityKind, FieldOp, Patch, Precondition, Result, StoredDocument, Summary, WriteBatch,
};

use crate::chunked::dedup;
use crate::relation::{managed_fields, sides_for, RelationSide};

/// Partner ids to resolve before planning, grouped by kind.
pub type LookupSet = BTreeMap<EntityKind, Vec<EntityId>>;

/// Summaries known to the planner, keyed by kind and id.
#[derive(Debug, Clone, Default)]
pub struct SummaryIndex {
    entries: HashMap<(EntityKind, EntityId), Summary>,
}

impl SummaryIndex {
    pub fn insert(&mut self, kind: EntityKind, id: EntityId, summary: Summary) {
        self.entries.insert((kind, id), summary);
    }

    pub fn insert_document(&mut self, doc: &StoredDocument) {
        if let Some(id) = doc.key.entity_id() {
            self.insert(doc.kind(), id.clone(), doc.summary());
        }
    }

    pub fn get(&self, kind: EntityKind, id: &EntityId) -> Option<&Summary> {
        self.entries.get(&(kind, id.clone()))
    }

    fn require(&self, kind: EntityKind, id: &EntityId) -> Result<&Summary> {
        self.get(kind, id)
            .ok_or_else(|| CatalogError::not_found(kind, id))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// An edit request: the entity's complete new state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditInput {
    pub kind: EntityKind,
    pub id: EntityId,
    /// The entity as the editor loaded it; `None` for a creation.
    pub snapshot: Option<StoredDocument>,
    /// Authoritative fields, excluding id lists and caches.
    pub fields: Map<String, Value>,
    /// New id list per relation field. A relation field left out is empty.
    #[serde(default)]
    pub relations: BTreeMap<String, Vec<EntityId>>,
}

impl EditInput {
    pub fn create(kind: EntityKind, id: impl Into<EntityId>, fields: Map<String, Value>) -> Self {
        Self {
            kind,
            id: id.into(),
            snapshot: None,
            fields,
            relations: BTreeMap::new(),
        }
    }

    pub fn update(snapshot: StoredDocument, fields: Map<String, Value>) -> Result<Self> {
        let (kind, id) = match &snapshot.key {
            DocumentKey::Entity { kind, id } => (*kind, id.clone()),
            DocumentKey::Aggregate { .. } => {
                return Err(CatalogError::InvalidOperation(format!(
                    "{} is not an entity document",
                    snapshot.key
                )))
            }
        };
        // Carry the current relations so a field-only edit keeps them.
        let relations = sides_for(kind)
            .into_iter()
            .map(|side| (side.ids_field.to_string(), snapshot.id_list(side.ids_field)))
            .collect();
        Ok(Self {
            kind,
            id,
            snapshot: Some(snapshot),
            fields,
            relations,
        })
    }

    pub fn with_relation(mut self, ids_field: &str, ids: Vec<EntityId>) -> Self {
        self.relations.insert(ids_field.to_string(), ids);
        self
    }

    pub fn key(&self) -> DocumentKey {
        DocumentKey::entity(self.kind, self.id.clone())
    }

    fn new_ids(&self, side: &RelationSide) -> Vec<EntityId> {
        self.relations
            .get(side.ids_field)
            .map(|ids| dedup(ids))
            .unwrap_or_default()
    }

    fn previous_ids(&self, side: &RelationSide) -> Vec<EntityId> {
        self.snapshot
            .as_ref()
            .map(|doc| dedup(&doc.id_list(side.ids_field)))
            .unwrap_or_default()
    }

    fn previous_cache(&self, side: &RelationSide) -> BTreeMap<EntityId, Summary> {
        match (side.cache_field, &self.snapshot) {
            (Some(field), Some(doc)) => doc.cache(field),
            _ => BTreeMap::new(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(snapshot) = &self.snapshot {
            if snapshot.key != self.key() {
                return Err(CatalogError::InvalidOperation(format!(
                    "snapshot {} does not belong to {}",
                    snapshot.key,
                    self.key()
                )));
            }
        }

        let sides = sides_for(self.kind);
        for field in self.relations.keys() {
            if !sides.iter().any(|side| side.ids_field == field) {
                return Err(CatalogError::InvalidOperation(format!(
                    "'{}' is not an editable relation of {}",
                    field, self.kind
                )));
            }
        }

        let managed = managed_fields(self.kind);
        if let Some(field) = self.fields.keys().find(|f| managed.contains(&f.as_str())) {
            return Err(CatalogError::InvalidOperation(format!(
                "'{}' is maintained by the relation engine and cannot be edited on {}",
                field, self.kind
            )));
        }
        Ok(())
    }
}

/// Per-relation set difference between the snapshot and the edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelationDiff {
    pub field: &'static str,
    pub partner: EntityKind,
    /// In new-list order.
    pub added: Vec<EntityId>,
    /// In previous-list order.
    pub removed: Vec<EntityId>,
    /// In new-list order.
    pub retained: Vec<EntityId>,
}

impl RelationDiff {
    pub fn compute(
        side: &RelationSide,
        previous: &[EntityId],
        new: &[EntityId],
    ) -> Self {
        let previous_set: HashSet<&EntityId> = previous.iter().collect();
        let new_set: HashSet<&EntityId> = new.iter().collect();

        let (retained, added): (Vec<EntityId>, Vec<EntityId>) = new
            .iter()
            .cloned()
            .partition(|id| previous_set.contains(id));
        let removed = previous
            .iter()
            .filter(|id| !new_set.contains(id))
            .cloned()
            .collect();

        Self {
            field: side.ids_field,
            partner: side.partner,
            added,
            removed,
            retained,
        }
    }

    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Ordered patches for one edit: the primary write first, dependents next,
/// the aggregate cache last.
#[derive(Debug, Clone)]
pub struct MutationPlan {
    pub kind: EntityKind,
    pub id: EntityId,
    pub patches: Vec<Patch>,
    pub diffs: Vec<RelationDiff>,
    pub summary: Summary,
    pub previous_summary: Option<Summary>,
    pub summary_changed: bool,
}

impl MutationPlan {
    pub fn primary(&self) -> &Patch {
        &self.patches[0]
    }

    pub fn patch_for(&self, key: &DocumentKey) -> Option<&Patch> {
        self.patches.iter().find(|patch| &patch.key == key)
    }

    /// Patches on related entities, excluding the primary and aggregate writes.
    pub fn dependent_patches(&self) -> impl Iterator<Item = &Patch> {
        self.patches
            .iter()
            .skip(1)
            .filter(|patch| !patch.key.is_aggregate())
    }

    pub fn len(&self) -> usize {
        self.patches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    pub fn to_batch(&self) -> WriteBatch {
        WriteBatch::new(self.patches.clone())
    }

    pub fn affected_pages(&self) -> AffectedPages {
        AffectedPages {
            kind: self.kind,
            id: self.id.clone(),
            category: self
                .summary
                .get(fields::CATEGORY)
                .and_then(Value::as_str)
                .map(str::to_string),
            dependents: self
                .dependent_patches()
                .filter_map(|patch| match &patch.key {
                    DocumentKey::Entity { kind, id } => Some((*kind, id.clone())),
                    DocumentKey::Aggregate { .. } => None,
                })
                .collect(),
        }
    }
}

/// Collects patches keyed by document so each document is written once.
#[derive(Default)]
struct PatchSet {
    patches: Vec<Patch>,
    index: HashMap<DocumentKey, usize>,
}

impl PatchSet {
    fn push(&mut self, key: DocumentKey, precondition: Precondition, ops: Vec<FieldOp>) {
        if ops.is_empty() {
            return;
        }
        match self.index.get(&key) {
            Some(&slot) => self.patches[slot].ops.extend(ops),
            None => {
                self.index.insert(key.clone(), self.patches.len());
                self.patches.push(Patch {
                    key,
                    precondition,
                    ops,
                });
            }
        }
    }

    fn stamp_entities(mut self) -> Vec<Patch> {
        for patch in &mut self.patches {
            if !patch.key.is_aggregate() {
                patch.ops.push(FieldOp::ServerTimestamp {
                    field: fields::UPDATED_AT.to_string(),
                });
            }
        }
        self.patches
    }
}

#[derive(Debug, Clone)]
pub struct MutationPlanner {
    optimistic_concurrency: bool,
}

impl Default for MutationPlanner {
    fn default() -> Self {
        Self::new(true)
    }
}

impl MutationPlanner {
    pub fn new(optimistic_concurrency: bool) -> Self {
        Self {
            optimistic_concurrency,
        }
    }

    /// Partner ids whose summaries or existence the plan depends on: every
    /// added id, plus retained ids missing from the snapshot's own cache.
    pub fn required_lookups(&self, input: &EditInput) -> Result<LookupSet> {
        input.validate()?;

        let mut lookups = LookupSet::new();
        for side in sides_for(input.kind) {
            let diff = RelationDiff::compute(&side, &input.previous_ids(&side), &input.new_ids(&side));
            let cache = input.previous_cache(&side);
            let wanted = lookups.entry(side.partner).or_default();
            wanted.extend(diff.added.iter().cloned());
            if side.cache_field.is_some() {
                wanted.extend(
                    diff.retained
                        .iter()
                        .filter(|id| !cache.contains_key(*id))
                        .cloned(),
                );
            }
        }
        lookups.retain(|_, ids| !ids.is_empty());
        for ids in lookups.values_mut() {
            *ids = dedup(ids);
        }
        Ok(lookups)
    }

    pub fn plan(&self, input: &EditInput, known: &SummaryIndex) -> Result<MutationPlan> {
        input.validate()?;

        let summary = project_summary(input.kind, &input.fields);
        let previous_summary = input.snapshot.as_ref().map(StoredDocument::summary);
        let summary_changed = previous_summary.as_ref() != Some(&summary);
        let summary_value = summary_to_value(&summary);
        let self_id = Value::String(input.id.as_str().to_string());

        let mut primary_fields = input.fields.clone();
        let mut dependents = PatchSet::default();
        let mut diffs = Vec::new();

        for side in sides_for(input.kind) {
            let new_ids = input.new_ids(&side);
            let diff = RelationDiff::compute(&side, &input.previous_ids(&side), &new_ids);

            for id in diff.added.iter() {
                known.require(side.partner, id)?;
            }

            primary_fields.insert(side.ids_field.to_string(), ids_to_value(&new_ids));
            if let Some(cache_field) = side.cache_field {
                let previous_cache = input.previous_cache(&side);
                let mut cache = Map::new();
                for id in &new_ids {
                    let entry = match previous_cache.get(id) {
                        Some(cached) if !diff.added.contains(id) => cached,
                        _ => known.require(side.partner, id)?,
                    };
                    cache.insert(id.as_str().to_string(), summary_to_value(entry));
                }
                primary_fields.insert(cache_field.to_string(), Value::Object(cache));
            }

            for id in &diff.removed {
                let mut ops = Vec::new();
                if let Some(ids_field) = side.partner_ids_field {
                    ops.push(FieldOp::ArrayRemove {
                        field: ids_field.to_string(),
                        values: vec![self_id.clone()],
                    });
                }
                if let Some(cache_field) = side.partner_cache_field {
                    ops.push(FieldOp::DeleteEntry {
                        field: cache_field.to_string(),
                        key: input.id.as_str().to_string(),
                    });
                }
                dependents.push(
                    DocumentKey::entity(side.partner, id.clone()),
                    Precondition::Exists,
                    ops,
                );
            }

            for id in &diff.added {
                let mut ops = Vec::new();
                if let Some(ids_field) = side.partner_ids_field {
                    ops.push(FieldOp::ArrayUnion {
                        field: ids_field.to_string(),
                        values: vec![self_id.clone()],
                    });
                }
                if let Some(cache_field) = side.partner_cache_field {
                    ops.push(FieldOp::SetEntry {
                        field: cache_field.to_string(),
                        key: input.id.as_str().to_string(),
                        value: summary_value.clone(),
                    });
                }
                dependents.push(
                    DocumentKey::entity(side.partner, id.clone()),
                    Precondition::Exists,
                    ops,
                );
            }

            if summary_changed {
                if let Some(cache_field) = side.partner_cache_field {
                    for id in &diff.retained {
                        dependents.push(
                            DocumentKey::entity(side.partner, id.clone()),
                            Precondition::Exists,
                            vec![FieldOp::SetEntry {
                                field: cache_field.to_string(),
                                key: input.id.as_str().to_string(),
                                value: summary_value.clone(),
                            }],
                        );
                    }
                }
            }

            diffs.push(diff);
        }

        let precondition = match (&input.snapshot, self.optimistic_concurrency) {
            (_, false) => Precondition::None,
            (Some(snapshot), true) => Precondition::Version(snapshot.version),
            (None, true) => Precondition::Absent,
        };

        let mut plan = PatchSet::default();
        plan.push(
            input.key(),
            precondition,
            vec![FieldOp::ReplaceDocument {
                fields: primary_fields,
            }],
        );
        for patch in dependents.patches {
            plan.push(patch.key, patch.precondition, patch.ops);
        }
        if summary_changed {
            plan.push(
                DocumentKey::aggregate(input.kind),
                Precondition::None,
                vec![FieldOp::Set {
                    field: input.id.as_str().to_string(),
                    value: summary_value,
                }],
            );
        }
        let patches = plan.stamp_entities();

        debug!(
            kind = %input.kind,
            id = %input.id,
            patches = patches.len(),
            summary_changed,
            "planned entity mutation"
        );

        Ok(MutationPlan {
            kind: input.kind,
            id: input.id.clone(),
            patches,
            diffs,
            summary,
            previous_summary,
            summary_changed,
        })
    }
}
