use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use frontis_types::{
    CatalogData, CatalogView, OfferingView, SemesterId, SemesterView, Stream, StreamId, Subject,
    SubjectOffering, CODE_NOT_APPLICABLE,
};

use crate::{CatalogStore, CatalogStoreError};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error(transparent)]
    Store(#[from] CatalogStoreError),
}

/// What an add/update/rename touched.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubjectMutation {
    pub subject_id: Uuid,
    pub subject_created: bool,
    pub offering_created: bool,
}

/// The only writer of the catalog.
///
/// Every mutation is a load → check → mutate → persist sequence under the
/// single writer lock, so uniqueness checks and their inserts cannot race
/// each other. Reads take a fresh snapshot from the store and skip the lock.
pub struct CatalogService {
    store: Arc<dyn CatalogStore>,
    write_lock: Mutex<()>,
}

impl CatalogService {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    /// Full catalog snapshot, for validation and the admin config view.
    pub async fn snapshot(&self) -> Result<CatalogData, CatalogError> {
        Ok(self.store.load().await?)
    }

    /// Upsert a subject by case-insensitive name and ensure it is offered in
    /// the given semester. An existing subject keeps its id; its code and
    /// stored casing follow the most recent write.
    pub async fn add_or_update_subject(
        &self,
        name: &str,
        code: &str,
        semester_id: SemesterId,
    ) -> Result<SubjectMutation, CatalogError> {
        let _guard = self.write_lock.lock().await;
        let mut data = self.store.load().await?;

        let name = name.trim();
        if data.semester(semester_id).is_none() {
            return Err(CatalogError::NotFound(format!("semester {semester_id}")));
        }
        let code = resolve_code(&mut data.retired_codes, name, code);

        let mutation = match data.subject_by_name_ci(name).map(|s| s.id) {
            Some(subject_id) => {
                let subject = data
                    .subjects
                    .iter_mut()
                    .find(|s| s.id == subject_id)
                    .ok_or_else(|| CatalogError::NotFound(format!("subject '{name}'")))?;
                subject.name = name.to_string();
                subject.code = code;
                let offering_created = ensure_offering(&mut data, subject_id, semester_id);
                SubjectMutation {
                    subject_id,
                    subject_created: false,
                    offering_created,
                }
            }
            None => {
                let subject_id = Uuid::new_v4();
                data.subjects.push(Subject {
                    id: subject_id,
                    name: name.to_string(),
                    code,
                });
                let offering_created = ensure_offering(&mut data, subject_id, semester_id);
                SubjectMutation {
                    subject_id,
                    subject_created: true,
                    offering_created,
                }
            }
        };

        self.store.persist(&data).await?;
        Ok(mutation)
    }

    /// Drop the subject's current offerings, then re-add it under the new
    /// name, code, and semester. The subject id survives the move so ledger
    /// back-references stay meaningful.
    pub async fn rename_or_move_subject(
        &self,
        original_name: &str,
        new_name: &str,
        new_code: &str,
        new_semester_id: SemesterId,
    ) -> Result<SubjectMutation, CatalogError> {
        let _guard = self.write_lock.lock().await;
        let mut data = self.store.load().await?;

        let new_name = new_name.trim();
        let subject_id = data
            .subject_by_name_ci(original_name)
            .map(|s| s.id)
            .ok_or_else(|| CatalogError::NotFound(format!("subject '{original_name}'")))?;
        if let Some(other) = data.subject_by_name_ci(new_name) {
            if other.id != subject_id {
                return Err(CatalogError::Conflict(format!(
                    "subject '{new_name}' already exists"
                )));
            }
        }
        if data.semester(new_semester_id).is_none() {
            return Err(CatalogError::NotFound(format!("semester {new_semester_id}")));
        }

        let code = resolve_code(&mut data.retired_codes, new_name, new_code);
        data.offerings.retain(|o| o.subject_id != subject_id);
        let subject = data
            .subjects
            .iter_mut()
            .find(|s| s.id == subject_id)
            .ok_or_else(|| CatalogError::NotFound(format!("subject '{original_name}'")))?;
        subject.name = new_name.to_string();
        subject.code = code;
        let offering_created = ensure_offering(&mut data, subject_id, new_semester_id);

        self.store.persist(&data).await?;
        Ok(SubjectMutation {
            subject_id,
            subject_created: false,
            offering_created,
        })
    }

    /// Delete a subject and every offering it has. Without `forget_code` the
    /// code is retired so a later re-add can restore it.
    pub async fn remove_subject(&self, name: &str, forget_code: bool) -> Result<(), CatalogError> {
        let _guard = self.write_lock.lock().await;
        let mut data = self.store.load().await?;

        let subject_id = data
            .subject_by_name_ci(name)
            .map(|s| s.id)
            .ok_or_else(|| CatalogError::NotFound(format!("subject '{name}'")))?;
        remove_subject_record(&mut data, subject_id, forget_code);

        self.store.persist(&data).await?;
        Ok(())
    }

    /// Remove one (subject, semester) pairing. When it was the subject's
    /// last offering, the orphaned subject record goes with it.
    pub async fn remove_offering(
        &self,
        subject_name: &str,
        semester_id: SemesterId,
    ) -> Result<(), CatalogError> {
        let _guard = self.write_lock.lock().await;
        let mut data = self.store.load().await?;

        let subject_id = data
            .subject_by_name_ci(subject_name)
            .map(|s| s.id)
            .ok_or_else(|| CatalogError::NotFound(format!("subject '{subject_name}'")))?;
        let before = data.offerings.len();
        data.offerings
            .retain(|o| !(o.subject_id == subject_id && o.semester_id == semester_id));
        if data.offerings.len() == before {
            return Err(CatalogError::NotFound(format!(
                "offering of '{subject_name}' in semester {semester_id}"
            )));
        }
        if data.offerings_of(subject_id) == 0 {
            remove_subject_record(&mut data, subject_id, false);
        }

        self.store.persist(&data).await?;
        Ok(())
    }

    /// Create or relabel a stream. The short code is re-derived from the
    /// label; label and short code stay unique across streams.
    pub async fn upsert_stream(&self, id: StreamId, label: &str) -> Result<Stream, CatalogError> {
        let _guard = self.write_lock.lock().await;
        let mut data = self.store.load().await?;

        let stream = Stream::new(id, label.trim());
        let clash = data.streams.iter().any(|s| {
            s.id != id
                && (s.label.eq_ignore_ascii_case(&stream.label) || s.short_code == stream.short_code)
        });
        if clash {
            return Err(CatalogError::Conflict(format!(
                "stream label '{}' already in use",
                stream.label
            )));
        }
        match data.streams.iter_mut().find(|s| s.id == id) {
            Some(existing) => *existing = stream.clone(),
            None => data.streams.push(stream.clone()),
        }

        self.store.persist(&data).await?;
        Ok(stream)
    }

    /// Unconditional delete; ledger records carry their own text snapshot,
    /// so history survives the stream.
    pub async fn remove_stream(&self, id: StreamId) -> Result<(), CatalogError> {
        let _guard = self.write_lock.lock().await;
        let mut data = self.store.load().await?;

        let before = data.streams.len();
        data.streams.retain(|s| s.id != id);
        if data.streams.len() == before {
            return Err(CatalogError::NotFound(format!("stream {id}")));
        }

        self.store.persist(&data).await?;
        Ok(())
    }

    /// The read model: semesters in order-index order with offerings joined
    /// to subject name/code, plus the stream and alias lists.
    pub async fn list_catalog(&self) -> Result<CatalogView, CatalogError> {
        let data = self.store.load().await?;

        let mut semesters: Vec<_> = data.semesters.clone();
        semesters.sort_by_key(|s| s.order_index);
        let semesters = semesters
            .into_iter()
            .map(|sem| {
                let mut offerings: Vec<OfferingView> = data
                    .offerings
                    .iter()
                    .filter(|o| o.semester_id == sem.id)
                    .filter_map(|o| data.subject_by_id(o.subject_id))
                    .map(|s| OfferingView {
                        subject_id: s.id,
                        name: s.name.clone(),
                        code: s.code.clone(),
                    })
                    .collect();
                offerings.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
                SemesterView {
                    id: sem.id,
                    label: sem.label,
                    offerings,
                }
            })
            .collect();

        let mut streams = data.streams.clone();
        streams.sort_by_key(|s| s.id);

        Ok(CatalogView {
            semesters,
            streams,
            display_aliases: data.display_aliases.clone(),
        })
    }
}

fn ensure_offering(data: &mut CatalogData, subject_id: Uuid, semester_id: SemesterId) -> bool {
    if data.offering_exists(subject_id, semester_id) {
        return false;
    }
    data.offerings.push(SubjectOffering {
        subject_id,
        semester_id,
    });
    true
}

fn remove_subject_record(data: &mut CatalogData, subject_id: Uuid, forget_code: bool) {
    let key = data
        .subject_by_id(subject_id)
        .map(|s| (s.name.to_lowercase(), s.code.clone()));
    data.subjects.retain(|s| s.id != subject_id);
    data.offerings.retain(|o| o.subject_id != subject_id);
    if let Some((name_key, code)) = key {
        if forget_code {
            data.retired_codes.remove(&name_key);
        } else {
            data.retired_codes.insert(name_key, code);
        }
    }
}

/// Explicit codes win; an empty code falls back to the retired code for
/// this name, then to the sentinel. Either way the retired entry is spent.
fn resolve_code(retired: &mut BTreeMap<String, String>, name: &str, code: &str) -> String {
    let remembered = retired.remove(&name.trim().to_lowercase());
    let code = code.trim();
    if code.is_empty() {
        remembered.unwrap_or_else(|| CODE_NOT_APPLICABLE.to_string())
    } else {
        code.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryCatalogStore;

    fn service() -> CatalogService {
        CatalogService::new(Arc::new(InMemoryCatalogStore::new()))
    }

    #[tokio::test]
    async fn add_creates_subject_and_offering() {
        let svc = service();
        let m = svc
            .add_or_update_subject("Data Structures", "CS201", 1)
            .await
            .unwrap();
        assert!(m.subject_created);
        assert!(m.offering_created);

        let data = svc.snapshot().await.unwrap();
        assert_eq!(data.subjects.len(), 1);
        assert_eq!(data.subjects[0].code, "CS201");
        assert!(data.offering_exists(m.subject_id, 1));
    }

    #[tokio::test]
    async fn case_insensitive_add_updates_instead_of_duplicating() {
        let svc = service();
        let first = svc
            .add_or_update_subject("Data Structures", "CS201", 1)
            .await
            .unwrap();
        let second = svc
            .add_or_update_subject("DATA STRUCTURES", "CS999", 1)
            .await
            .unwrap();
        assert_eq!(first.subject_id, second.subject_id);
        assert!(!second.subject_created);

        let data = svc.snapshot().await.unwrap();
        assert_eq!(data.subjects.len(), 1);
        // casing and code of the most recent write
        assert_eq!(data.subjects[0].name, "DATA STRUCTURES");
        assert_eq!(data.subjects[0].code, "CS999");
    }

    #[tokio::test]
    async fn repeated_offering_is_idempotent() {
        let svc = service();
        svc.add_or_update_subject("Maths", "M101", 2).await.unwrap();
        let again = svc.add_or_update_subject("Maths", "M101", 2).await.unwrap();
        assert!(!again.offering_created);

        let data = svc.snapshot().await.unwrap();
        assert_eq!(data.offerings.len(), 1);
    }

    #[tokio::test]
    async fn subject_can_be_offered_in_many_semesters() {
        let svc = service();
        let m1 = svc.add_or_update_subject("Maths", "M101", 1).await.unwrap();
        let m2 = svc.add_or_update_subject("Maths", "M101", 2).await.unwrap();
        assert_eq!(m1.subject_id, m2.subject_id);

        let data = svc.snapshot().await.unwrap();
        assert_eq!(data.subjects.len(), 1);
        assert_eq!(data.offerings_of(m1.subject_id), 2);
    }

    #[tokio::test]
    async fn blank_code_normalizes_to_sentinel() {
        let svc = service();
        svc.add_or_update_subject("Workshop", "   ", 1).await.unwrap();
        let data = svc.snapshot().await.unwrap();
        assert_eq!(data.subjects[0].code, CODE_NOT_APPLICABLE);
    }

    #[tokio::test]
    async fn unknown_semester_is_not_found() {
        let svc = service();
        let err = svc
            .add_or_update_subject("Maths", "M101", 42)
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::NotFound(_)));
    }

    #[tokio::test]
    async fn rename_onto_other_subject_is_conflict() {
        let svc = service();
        svc.add_or_update_subject("Data Structures", "CS201", 1)
            .await
            .unwrap();
        svc.add_or_update_subject("Operating Systems", "CS301", 1)
            .await
            .unwrap();

        let err = svc
            .rename_or_move_subject("Data Structures", "operating systems", "X", 1)
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Conflict(_)));

        // both subjects untouched
        let data = svc.snapshot().await.unwrap();
        assert_eq!(data.subjects.len(), 2);
        assert!(data.subject_by_name_ci("Data Structures").is_some());
        let os = data.subject_by_name_ci("Operating Systems").unwrap();
        assert_eq!(os.code, "CS301");
    }

    #[tokio::test]
    async fn rename_moves_offerings_and_keeps_id() {
        let svc = service();
        let m = svc.add_or_update_subject("Maths", "M101", 1).await.unwrap();
        svc.add_or_update_subject("Maths", "M101", 2).await.unwrap();

        let moved = svc
            .rename_or_move_subject("Maths", "Maths II", "M201", 3)
            .await
            .unwrap();
        assert_eq!(moved.subject_id, m.subject_id);

        let data = svc.snapshot().await.unwrap();
        let subject = data.subject_by_name_ci("Maths II").unwrap();
        assert_eq!(subject.code, "M201");
        assert_eq!(data.offerings_of(subject.id), 1);
        assert!(data.offering_exists(subject.id, 3));
    }

    #[tokio::test]
    async fn rename_to_same_subject_different_case_is_not_conflict() {
        let svc = service();
        svc.add_or_update_subject("maths", "M101", 1).await.unwrap();
        svc.rename_or_move_subject("maths", "Maths", "M101", 1)
            .await
            .unwrap();
        let data = svc.snapshot().await.unwrap();
        assert_eq!(data.subjects[0].name, "Maths");
    }

    #[tokio::test]
    async fn remove_subject_cascades_offerings() {
        let svc = service();
        svc.add_or_update_subject("Maths", "M101", 1).await.unwrap();
        svc.add_or_update_subject("Maths", "M101", 2).await.unwrap();

        svc.remove_subject("maths", false).await.unwrap();
        let data = svc.snapshot().await.unwrap();
        assert!(data.subjects.is_empty());
        assert!(data.offerings.is_empty());

        let err = svc.remove_subject("Maths", false).await.unwrap_err();
        assert!(matches!(err, CatalogError::NotFound(_)));
    }

    #[tokio::test]
    async fn retired_code_is_restored_on_readd() {
        let svc = service();
        svc.add_or_update_subject("Maths", "M101", 1).await.unwrap();
        svc.remove_subject("Maths", false).await.unwrap();

        svc.add_or_update_subject("Maths", "", 1).await.unwrap();
        let data = svc.snapshot().await.unwrap();
        assert_eq!(data.subjects[0].code, "M101");
        assert!(data.retired_codes.is_empty());
    }

    #[tokio::test]
    async fn forgotten_code_is_not_restored() {
        let svc = service();
        svc.add_or_update_subject("Maths", "M101", 1).await.unwrap();
        svc.remove_subject("Maths", true).await.unwrap();

        svc.add_or_update_subject("Maths", "", 1).await.unwrap();
        let data = svc.snapshot().await.unwrap();
        assert_eq!(data.subjects[0].code, CODE_NOT_APPLICABLE);
    }

    #[tokio::test]
    async fn removing_last_offering_removes_subject() {
        let svc = service();
        svc.add_or_update_subject("Maths", "M101", 1).await.unwrap();
        svc.add_or_update_subject("Maths", "M101", 2).await.unwrap();

        svc.remove_offering("Maths", 1).await.unwrap();
        let data = svc.snapshot().await.unwrap();
        assert_eq!(data.subjects.len(), 1);

        svc.remove_offering("Maths", 2).await.unwrap();
        let data = svc.snapshot().await.unwrap();
        assert!(data.subjects.is_empty());
        assert!(data.offerings.is_empty());
    }

    #[tokio::test]
    async fn stream_upsert_and_unconditional_delete() {
        let svc = service();
        let cs = svc.upsert_stream(1, "Computer Science").await.unwrap();
        assert_eq!(cs.short_code, "COMPUTER_SCIENCE");

        // relabel keeps the id, re-derives the code
        let cse = svc.upsert_stream(1, "Computer Science & Engg").await.unwrap();
        assert_eq!(cse.short_code, "COMPUTER_SCIENCE_&_ENGG");

        let err = svc.upsert_stream(2, "computer science & engg").await.unwrap_err();
        assert!(matches!(err, CatalogError::Conflict(_)));

        svc.remove_stream(1).await.unwrap();
        let err = svc.remove_stream(1).await.unwrap_err();
        assert!(matches!(err, CatalogError::NotFound(_)));
    }

    #[tokio::test]
    async fn list_catalog_orders_semesters_and_subjects() {
        let svc = service();
        svc.add_or_update_subject("zoology", "Z1", 2).await.unwrap();
        svc.add_or_update_subject("Algebra", "A1", 2).await.unwrap();
        svc.upsert_stream(2, "ECE").await.unwrap();
        svc.upsert_stream(1, "CSE").await.unwrap();

        let view = svc.list_catalog().await.unwrap();
        assert_eq!(view.semesters.len(), 8);
        assert_eq!(view.semesters[0].label, "1ST");
        assert!(view.semesters[0].offerings.is_empty());

        let second = &view.semesters[1];
        let names: Vec<_> = second.offerings.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, ["Algebra", "zoology"]);

        let ids: Vec<_> = view.streams.iter().map(|s| s.id).collect();
        assert_eq!(ids, [1, 2]);
    }
}
