//! The canonical field schema and the alias table that feeds it.
//!
//! ## Declaration order is part of the behaviour
//!
//! The mapper walks [`AliasTable`] entries top to bottom and stops at the
//! first entry with a matching alias. Because matching is a permissive
//! bidirectional substring test, a label such as `"Patient Age"` matches
//! both `patient.name` (alias `"Patient"`) and `patient.age`; the entry
//! declared first wins. The table is therefore a `Vec`, never a hash map.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Top-level section of the canonical report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Section {
    Patient,
    Owner,
    Veterinarian,
    Study,
    Clinical,
}

impl Section {
    pub fn as_str(self) -> &'static str {
        match self {
            Section::Patient => "patient",
            Section::Owner => "owner",
            Section::Veterinarian => "veterinarian",
            Section::Study => "study",
            Section::Clinical => "clinical",
        }
    }
}

/// A `(section, field)` slot in the canonical schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldKey {
    pub section: Section,
    pub field: &'static str,
}

impl FieldKey {
    pub const fn new(section: Section, field: &'static str) -> Self {
        Self { section, field }
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.section.as_str(), self.field)
    }
}

pub const PATIENT_NAME: FieldKey = FieldKey::new(Section::Patient, "name");
pub const PATIENT_SPECIES: FieldKey = FieldKey::new(Section::Patient, "species");
pub const PATIENT_BREED: FieldKey = FieldKey::new(Section::Patient, "breed");
pub const PATIENT_AGE: FieldKey = FieldKey::new(Section::Patient, "age");
pub const PATIENT_WEIGHT: FieldKey = FieldKey::new(Section::Patient, "weight");
pub const PATIENT_SEX: FieldKey = FieldKey::new(Section::Patient, "sex");
pub const OWNER_NAME: FieldKey = FieldKey::new(Section::Owner, "name");
pub const OWNER_PHONE: FieldKey = FieldKey::new(Section::Owner, "phone");
pub const OWNER_EMAIL: FieldKey = FieldKey::new(Section::Owner, "email");
pub const OWNER_ADDRESS: FieldKey = FieldKey::new(Section::Owner, "address");
pub const VET_NAME: FieldKey = FieldKey::new(Section::Veterinarian, "name");
pub const VET_LICENSE: FieldKey = FieldKey::new(Section::Veterinarian, "license");
pub const VET_CLINIC: FieldKey = FieldKey::new(Section::Veterinarian, "clinic");
pub const STUDY_DATE: FieldKey = FieldKey::new(Section::Study, "date");
pub const STUDY_TYPE: FieldKey = FieldKey::new(Section::Study, "type");
pub const CLINICAL_DIAGNOSIS: FieldKey = FieldKey::new(Section::Clinical, "diagnosis");
pub const CLINICAL_OBSERVATIONS: FieldKey = FieldKey::new(Section::Clinical, "observations");
pub const CLINICAL_RECOMMENDATIONS: FieldKey = FieldKey::new(Section::Clinical, "recommendations");
pub const CLINICAL_MEASUREMENTS: FieldKey = FieldKey::new(Section::Clinical, "measurements");

/// Label spellings the extraction engine has been seen to use, in match order.
const DEFAULT_ALIASES: &[(FieldKey, &[&str])] = &[
    (PATIENT_NAME, &["Patient", "Patient Name", "Paciente", "Nombre Paciente", "Pet Name", "Animal"]),
    (PATIENT_SPECIES, &["Species", "Especie", "Animal Type", "Tipo Animal"]),
    (PATIENT_BREED, &["Breed", "Raza", "Race"]),
    (PATIENT_AGE, &["Age", "Edad", "Patient Age"]),
    (PATIENT_WEIGHT, &["Weight", "Peso", "Patient Weight"]),
    (PATIENT_SEX, &["Sex", "Sexo", "Gender", "Género"]),
    (OWNER_NAME, &["Owner", "Owner Name", "Dueño", "Propietario", "Client", "Cliente"]),
    (OWNER_PHONE, &["Phone", "Teléfono", "Contact", "Contacto"]),
    (OWNER_EMAIL, &["Email", "Correo", "E-mail"]),
    (OWNER_ADDRESS, &["Address", "Dirección", "Domicilio"]),
    (VET_NAME, &["Veterinarian", "Vet", "Veterinario", "Doctor", "Dr.", "Médico"]),
    (VET_LICENSE, &["License", "Licencia", "Cédula", "Registration"]),
    (VET_CLINIC, &["Clinic", "Clínica", "Hospital", "Centro Veterinario"]),
    (STUDY_DATE, &["Date", "Fecha", "Study Date", "Fecha Estudio", "Exam Date"]),
    (STUDY_TYPE, &["Study Type", "Tipo Estudio", "Exam Type", "Examination"]),
    (CLINICAL_DIAGNOSIS, &["Diagnosis", "Diagnóstico", "Findings", "Hallazgos", "Impression", "Impresión"]),
    (CLINICAL_OBSERVATIONS, &["Observations", "Observaciones", "Notes", "Notas", "Comments"]),
    (CLINICAL_RECOMMENDATIONS, &["Recommendations", "Recomendaciones", "Treatment", "Tratamiento", "Follow-up"]),
    (CLINICAL_MEASUREMENTS, &["Measurements", "Mediciones", "Dimensions", "Dimensiones"]),
];

/// One row of the alias table. Aliases are stored lower-cased.
#[derive(Debug, Clone)]
pub struct AliasEntry {
    pub key: FieldKey,
    aliases: Vec<String>,
}

impl AliasEntry {
    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    /// Bidirectional substring test against an already lower-cased label.
    fn matches(&self, label: &str) -> bool {
        self.aliases
            .iter()
            .any(|alias| label.contains(alias.as_str()) || alias.contains(label))
    }
}

/// Immutable, ordered mapping from canonical field to accepted labels.
///
/// Build once at start-up and share behind an `Arc`.
#[derive(Debug, Clone)]
pub struct AliasTable {
    entries: Vec<AliasEntry>,
}

impl Default for AliasTable {
    fn default() -> Self {
        Self::from_entries(DEFAULT_ALIASES.iter().map(|(key, aliases)| (*key, aliases.iter().copied())))
    }
}

impl AliasTable {
    /// Build a table from `(key, aliases)` rows, preserving row order.
    pub fn from_entries<I, A, S>(rows: I) -> Self
    where
        I: IntoIterator<Item = (FieldKey, A)>,
        A: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let entries = rows
            .into_iter()
            .map(|(key, aliases)| AliasEntry {
                key,
                aliases: aliases
                    .into_iter()
                    .map(|a| a.as_ref().to_lowercase())
                    .filter(|a| !a.is_empty())
                    .collect(),
            })
            .collect();
        Self { entries }
    }

    pub fn entries(&self) -> &[AliasEntry] {
        &self.entries
    }

    /// First field whose aliases match `label`, scanning in declaration order.
    ///
    /// `label` is trimmed and lower-cased here. A blank label never matches;
    /// under the two-way substring test it would match the first row.
    pub fn resolve(&self, label: &str) -> Option<FieldKey> {
        let label = label.trim().to_lowercase();
        if label.is_empty() {
            return None;
        }
        self.entries
            .iter()
            .find(|entry| entry.matches(&label))
            .map(|entry| entry.key)
    }
}
