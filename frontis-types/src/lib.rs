use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type StreamId = u32;
pub type SemesterId = u32;

/// Code shown for subjects that never got a course code assigned.
pub const CODE_NOT_APPLICABLE: &str = "N/A";

/// Number of semesters seeded on first boot, ordered 1..=8.
pub const SEMESTER_COUNT: u32 = 8;

/// A track of study (department/program).
///
/// The short code is derived from the label and is not independently
/// editable; see [`stream_short_code`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stream {
    pub id: StreamId,
    pub label: String,
    pub short_code: String,
}

impl Stream {
    pub fn new(id: StreamId, label: impl Into<String>) -> Self {
        let label = label.into();
        let short_code = stream_short_code(&label);
        Self { id, label, short_code }
    }
}

/// Uppercase the label and collapse whitespace runs into `_`.
pub fn stream_short_code(label: &str) -> String {
    label
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .to_uppercase()
}

/// An ordinal teaching period (`1ST` .. `8TH`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Semester {
    pub id: SemesterId,
    pub label: String,
    pub order_index: u32,
}

/// A course. Name is unique case-insensitively across the whole catalog;
/// display keeps the casing of the most recent write.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub id: Uuid,
    pub name: String,
    pub code: String,
}

/// Join of Subject x Semester. Each pairing appears at most once; a subject
/// whose last offering goes away is removed with it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectOffering {
    pub subject_id: Uuid,
    pub semester_id: SemesterId,
}

/// Cosmetic rename applied when a subject is generated under a specific
/// stream. Affects the rendered artifact and the ledger snapshot, not the
/// catalog itself.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayAlias {
    pub stream_id: StreamId,
    pub subject_name: String,
    pub display_name: String,
}

/// Whole-catalog snapshot as persisted by the store backends.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogData {
    pub streams: Vec<Stream>,
    pub semesters: Vec<Semester>,
    pub subjects: Vec<Subject>,
    pub offerings: Vec<SubjectOffering>,
    #[serde(default)]
    pub display_aliases: Vec<DisplayAlias>,
    /// Codes of removed subjects, keyed by lowercased name, restored when
    /// the subject is re-added without a code.
    #[serde(default)]
    pub retired_codes: BTreeMap<String, String>,
}

impl CatalogData {
    /// Catalog state for a first boot: the eight semesters plus the one
    /// historical display alias.
    pub fn seed() -> Self {
        let semesters = (1..=SEMESTER_COUNT)
            .map(|n| Semester {
                id: n,
                label: ordinal_label(n),
                order_index: n,
            })
            .collect();
        Self {
            streams: Vec::new(),
            semesters,
            subjects: Vec::new(),
            offerings: Vec::new(),
            display_aliases: vec![DisplayAlias {
                stream_id: 3,
                subject_name: "Data Structures & Algorithms Lab".into(),
                display_name: "Data Structure Lab".into(),
            }],
            retired_codes: BTreeMap::new(),
        }
    }

    pub fn semester(&self, id: SemesterId) -> Option<&Semester> {
        self.semesters.iter().find(|s| s.id == id)
    }

    pub fn stream(&self, id: StreamId) -> Option<&Stream> {
        self.streams.iter().find(|s| s.id == id)
    }

    pub fn subject_by_id(&self, id: Uuid) -> Option<&Subject> {
        self.subjects.iter().find(|s| s.id == id)
    }

    pub fn subject_by_name_ci(&self, name: &str) -> Option<&Subject> {
        let needle = name.trim().to_lowercase();
        self.subjects.iter().find(|s| s.name.to_lowercase() == needle)
    }

    pub fn offering_exists(&self, subject_id: Uuid, semester_id: SemesterId) -> bool {
        self.offerings
            .iter()
            .any(|o| o.subject_id == subject_id && o.semester_id == semester_id)
    }

    pub fn offerings_of(&self, subject_id: Uuid) -> usize {
        self.offerings.iter().filter(|o| o.subject_id == subject_id).count()
    }

    /// Display name for a subject under a stream, after aliasing.
    pub fn display_name_for(&self, stream_id: StreamId, subject_name: &str) -> String {
        self.display_aliases
            .iter()
            .find(|a| a.stream_id == stream_id && a.subject_name == subject_name)
            .map(|a| a.display_name.clone())
            .unwrap_or_else(|| subject_name.to_string())
    }
}

fn ordinal_label(n: u32) -> String {
    match n {
        1 => "1ST".into(),
        2 => "2ND".into(),
        3 => "3RD".into(),
        _ => format!("{n}TH"),
    }
}

/// Read model for the generation form, the admin surface, and the CLI:
/// semesters in order-index order with their offerings joined to subjects.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CatalogView {
    pub semesters: Vec<SemesterView>,
    pub streams: Vec<Stream>,
    pub display_aliases: Vec<DisplayAlias>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SemesterView {
    pub id: SemesterId,
    pub label: String,
    pub offerings: Vec<OfferingView>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OfferingView {
    pub subject_id: Uuid,
    pub name: String,
    pub code: String,
}

/// Output container format for a rendered cover.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactFormat {
    #[default]
    Png,
    Pdf,
}

impl ArtifactFormat {
    pub fn mime(&self) -> &'static str {
        match self {
            ArtifactFormat::Png => "image/png",
            ArtifactFormat::Pdf => "application/pdf",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ArtifactFormat::Png => "png",
            ArtifactFormat::Pdf => "pdf",
        }
    }
}

/// A generation request after every identifier has been validated against
/// the catalog. Everything the renderer needs, nothing it has to look up.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedSelection {
    pub name: String,
    pub roll: String,
    pub reg: String,
    pub stream_label: String,
    pub semester_label: String,
    pub subject_name: String,
    pub subject_code: String,
}

impl ResolvedSelection {
    /// The seven overlay lines, top to bottom.
    pub fn overlay_lines(&self) -> [&str; 7] {
        [
            &self.name,
            &self.roll,
            &self.reg,
            &self.stream_label,
            &self.semester_label,
            &self.subject_code,
            &self.subject_name,
        ]
    }
}
