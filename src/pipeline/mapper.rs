//! Entity field mapping: reconcile extractor annotations into the schema.
//!
//! Each [`EntityRecord`] is routed to at most one canonical field by
//! [`AliasTable::resolve`]. When two entities land on the same field the
//! rule is: an empty slot is always filled; an occupied slot is replaced
//! only by a candidate whose confidence exceeds [`OVERWRITE_CONFIDENCE`].
//! A later low-confidence entity therefore never displaces an earlier one,
//! while a later high-confidence entity always does.

use crate::report::{EntityRecord, FieldValue};
use crate::schema::{AliasTable, FieldKey, Section};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Confidence (engine scale) a candidate needs to replace an existing value.
pub const OVERWRITE_CONFIDENCE: f32 = 0.70;

/// Fields the mapper managed to populate. Untouched fields are absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappedFields {
    fields: BTreeMap<FieldKey, FieldValue>,
}

impl MappedFields {
    pub fn get(&self, key: FieldKey) -> Option<&FieldValue> {
        self.fields.get(&key)
    }

    /// The mapped value, or `None` when absent or blank.
    pub fn value(&self, key: FieldKey) -> Option<&str> {
        self.get(key)
            .map(|v| v.value.as_str())
            .filter(|v| !v.is_empty())
    }

    /// Populated fields of one section, in field-name order.
    pub fn section(&self, section: Section) -> impl Iterator<Item = (&FieldKey, &FieldValue)> {
        self.fields.iter().filter(move |(k, _)| k.section == section)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn offer(&mut self, key: FieldKey, text: &str, confidence: f32) -> bool {
        let candidate = FieldValue {
            value: text.to_string(),
            confidence: to_percent(confidence),
        };
        match self.fields.get_mut(&key) {
            None => {
                self.fields.insert(key, candidate);
                true
            }
            Some(existing) if confidence > OVERWRITE_CONFIDENCE => {
                *existing = candidate;
                true
            }
            Some(_) => false,
        }
    }
}

/// Maps entity records onto the canonical schema using an injected alias table.
#[derive(Debug, Clone)]
pub struct EntityMapper {
    aliases: Arc<AliasTable>,
}

impl Default for EntityMapper {
    fn default() -> Self {
        Self::new(Arc::new(AliasTable::default()))
    }
}

impl EntityMapper {
    pub fn new(aliases: Arc<AliasTable>) -> Self {
        Self { aliases }
    }

    pub fn aliases(&self) -> &AliasTable {
        &self.aliases
    }

    /// Route every entity to its first matching field and apply the conflict rule.
    pub fn map_entities(&self, entities: &[EntityRecord]) -> MappedFields {
        let mut mapped = MappedFields::default();

        for entity in entities {
            let Some(key) = self.aliases.resolve(&entity.type_label) else {
                debug!(label = %entity.type_label, "Entity label matched no schema field");
                continue;
            };

            let confidence = sanitize_confidence(entity.confidence);
            let accepted = mapped.offer(key, entity.text.trim(), confidence);
            debug!(
                label = %entity.type_label,
                field = %key,
                confidence,
                accepted,
                "Mapped entity"
            );
        }

        mapped
    }
}

fn sanitize_confidence(c: f32) -> f32 {
    if c.is_nan() {
        0.0
    } else {
        c.clamp(0.0, 1.0)
    }
}

fn to_percent(c: f32) -> u8 {
    (c * 100.0).round().clamp(0.0, 100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{CLINICAL_DIAGNOSIS, OWNER_NAME, PATIENT_BREED, PATIENT_NAME};

    fn mapper() -> EntityMapper {
        EntityMapper::default()
    }

    #[test]
    fn higher_confidence_later_entity_displaces_earlier() {
        let mapped = mapper().map_entities(&[
            EntityRecord::new("patient_name", "Firulais", 0.5),
            EntityRecord::new("patient_name", "Max", 0.9),
        ]);
        let v = mapped.get(PATIENT_NAME).unwrap();
        assert_eq!(v.value, "Max");
        assert_eq!(v.confidence, 90);
    }

    #[test]
    fn lower_confidence_later_entity_does_not_displace() {
        let mapped = mapper().map_entities(&[
            EntityRecord::new("patient_name", "Max", 0.9),
            EntityRecord::new("patient_name", "Firulais", 0.5),
        ]);
        assert_eq!(mapped.value(PATIENT_NAME), Some("Max"));
    }

    #[test]
    fn threshold_is_exclusive() {
        let mapped = mapper().map_entities(&[
            EntityRecord::new("Raza", "Labrador", 0.4),
            EntityRecord::new("Raza", "Golden", 0.70),
        ]);
        assert_eq!(mapped.value(PATIENT_BREED), Some("Labrador"));
    }

    #[test]
    fn empty_slot_filled_regardless_of_confidence() {
        let mapped = mapper().map_entities(&[EntityRecord::new("Owner", "Ana Pérez", 0.05)]);
        let v = mapped.get(OWNER_NAME).unwrap();
        assert_eq!(v.value, "Ana Pérez");
        assert_eq!(v.confidence, 5);
    }

    #[test]
    fn entity_populates_only_first_matching_field() {
        let mapped = mapper().map_entities(&[EntityRecord::new("Patient Age", "7 años", 0.8)]);
        assert_eq!(mapped.len(), 1);
        assert_eq!(mapped.value(PATIENT_NAME), Some("7 años"));
    }

    #[test]
    fn text_is_trimmed_and_confidence_clamped() {
        let mapped = mapper().map_entities(&[
            EntityRecord::new("Diagnosis", "  Hepatomegalia leve \n", 1.7),
        ]);
        let v = mapped.get(CLINICAL_DIAGNOSIS).unwrap();
        assert_eq!(v.value, "Hepatomegalia leve");
        assert_eq!(v.confidence, 100);
    }

    #[test]
    fn nan_confidence_counts_as_zero() {
        let mapped = mapper().map_entities(&[
            EntityRecord::new("Owner", "Ana", 0.3),
            EntityRecord::new("Owner", "Luis", f32::NAN),
        ]);
        assert_eq!(mapped.value(OWNER_NAME), Some("Ana"));
    }

    #[test]
    fn unmatched_and_empty_labels_are_ignored() {
        let mapped = mapper().map_entities(&[
            EntityRecord::new("", "whatever", 0.99),
            EntityRecord::new("microchip_id", "985112", 0.99),
        ]);
        assert!(mapped.is_empty());
    }

    #[test]
    fn blank_value_reads_as_absent() {
        let mapped = mapper().map_entities(&[EntityRecord::new("Owner", "   ", 0.9)]);
        assert!(mapped.get(OWNER_NAME).is_some());
        assert_eq!(mapped.value(OWNER_NAME), None);
    }

    #[test]
    fn section_iterates_only_that_section() {
        let mapped = mapper().map_entities(&[
            EntityRecord::new("Owner", "Ana", 0.9),
            EntityRecord::new("Raza", "Beagle", 0.9),
            EntityRecord::new("Especie", "Canino", 0.9),
        ]);
        let fields: Vec<&str> = mapped.section(Section::Patient).map(|(k, _)| k.field).collect();
        assert_eq!(fields, vec!["breed", "species"]);
    }
}
