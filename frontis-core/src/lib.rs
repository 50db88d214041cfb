use std::sync::Arc;

use thiserror::Error;
use uuid::Uuid;

use frontis_catalog::{CatalogError, CatalogService};
use frontis_ledger::{GenerationLedger, GenerationRecord, LedgerError};
use frontis_render::{CoverRenderer, RenderError};
use frontis_types::{
    ArtifactFormat, CatalogData, CatalogView, ResolvedSelection, SemesterId, StreamId,
};

/// Incoming generation request, identifiers still unvalidated.
#[derive(Clone, Debug)]
pub struct GenerateRequest {
    pub name: String,
    pub roll: String,
    pub reg: String,
    pub semester_id: SemesterId,
    pub subject_id: Uuid,
    pub stream_id: StreamId,
    pub format: ArtifactFormat,
}

/// The artifact handed back to the caller. `ledger_warning` is set when the
/// history append failed after a successful render.
#[derive(Debug)]
pub struct GeneratedCover {
    pub bytes: Vec<u8>,
    pub mime_type: &'static str,
    pub file_name: String,
    pub ledger_warning: Option<String>,
}

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("invalid selection: {0}")]
    InvalidSelection(String),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// Sequences a generation request: Received → Validated → Rendered →
/// Logged → Completed. The only place that orders the side effects; the
/// catalog service, renderer, and ledger never call each other.
pub struct Orchestrator {
    catalog: Arc<CatalogService>,
    renderer: Arc<dyn CoverRenderer>,
    ledger: Arc<GenerationLedger>,
}

impl Orchestrator {
    pub fn new(
        catalog: Arc<CatalogService>,
        renderer: Arc<dyn CoverRenderer>,
        ledger: Arc<GenerationLedger>,
    ) -> Self {
        Self {
            catalog,
            renderer,
            ledger,
        }
    }

    /// Admin mutations go straight to the catalog service.
    pub fn catalog(&self) -> &CatalogService {
        &self.catalog
    }

    pub async fn list_catalog(&self) -> Result<CatalogView, CatalogError> {
        self.catalog.list_catalog().await
    }

    /// Raw catalog snapshot for the admin config view.
    pub async fn catalog_snapshot(&self) -> Result<CatalogData, CatalogError> {
        self.catalog.snapshot().await
    }

    pub fn recent_logs(&self, limit: usize) -> Result<Vec<GenerationRecord>, LedgerError> {
        self.ledger.recent_n(limit)
    }

    pub fn total_generated(&self) -> Result<usize, LedgerError> {
        self.ledger.count()
    }

    pub async fn generate(&self, req: GenerateRequest) -> Result<GeneratedCover, GenerateError> {
        // Validated: everything is checked before any rendering work.
        let name = non_empty("name", &req.name)?;
        let roll = non_empty("roll", &req.roll)?;
        let reg = non_empty("reg", &req.reg)?;

        let data = self.catalog.snapshot().await?;
        let semester = data.semester(req.semester_id).ok_or_else(|| {
            GenerateError::InvalidSelection(format!("unknown semester id {}", req.semester_id))
        })?;
        let stream = data.stream(req.stream_id).ok_or_else(|| {
            GenerateError::InvalidSelection(format!("unknown stream id {}", req.stream_id))
        })?;
        let subject = data.subject_by_id(req.subject_id).ok_or_else(|| {
            GenerateError::InvalidSelection(format!("unknown subject id {}", req.subject_id))
        })?;
        if !data.offering_exists(subject.id, semester.id) {
            return Err(GenerateError::InvalidSelection(format!(
                "subject '{}' is not offered in semester {}",
                subject.name, semester.label
            )));
        }

        // Display aliasing feeds the artifact and the ledger snapshot alike;
        // the code stays the subject's own.
        let subject_name = data.display_name_for(stream.id, &subject.name);

        let selection = ResolvedSelection {
            name,
            roll,
            reg,
            stream_label: stream.label.clone(),
            semester_label: semester.label.clone(),
            subject_name: subject_name.clone(),
            subject_code: subject.code.clone(),
        };

        // Rendered.
        let rendered = self.renderer.render(&selection, req.format)?;

        // Logged: a failed append must not cost the caller the download.
        let record = GenerationRecord {
            record_id: Uuid::new_v4(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            name: selection.name.clone(),
            roll: selection.roll.clone(),
            reg: selection.reg.clone(),
            subject_name: selection.subject_name.clone(),
            subject_code: selection.subject_code.clone(),
            stream_label: selection.stream_label.clone(),
            semester_label: selection.semester_label.clone(),
            subject_id: subject.id,
            stream_id: stream.id,
            semester_id: semester.id,
            prev_hash: None,
            chain_hash: String::new(),
        };
        let ledger_warning = match self.ledger.append(record) {
            Ok(()) => None,
            Err(e) => {
                tracing::warn!(error = %e, "generation completed but was not recorded");
                Some(format!("generation was not recorded: {e}"))
            }
        };

        // Completed.
        let file_name = format!(
            "{}-{}-FrontPageCover.{}",
            selection.name,
            selection.subject_name.replace(' ', "-"),
            req.format.extension()
        );
        tracing::info!(
            name = %selection.name,
            subject = %selection.subject_name,
            format = ?req.format,
            "generated front page cover"
        );
        Ok(GeneratedCover {
            bytes: rendered.bytes,
            mime_type: req.format.mime(),
            file_name,
            ledger_warning,
        })
    }
}

fn non_empty(field: &str, value: &str) -> Result<String, GenerateError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(GenerateError::InvalidSelection(format!(
            "'{field}' must not be empty"
        )));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use frontis_catalog::InMemoryCatalogStore;
    use frontis_render::NullCoverRenderer;
    use std::fs;

    struct Fixture {
        orchestrator: Orchestrator,
        _dir: tempfile::TempDir,
    }

    async fn fixture() -> (Fixture, Uuid) {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(CatalogService::new(Arc::new(InMemoryCatalogStore::new())));
        catalog.upsert_stream(1, "CSE").await.unwrap();
        let m = catalog
            .add_or_update_subject("Data Structures", "CS201", 1)
            .await
            .unwrap();
        let ledger =
            Arc::new(GenerationLedger::open(dir.path().join("ledger.jsonl")).unwrap());
        let orchestrator = Orchestrator::new(catalog, Arc::new(NullCoverRenderer), ledger);
        (
            Fixture {
                orchestrator,
                _dir: dir,
            },
            m.subject_id,
        )
    }

    fn request(subject_id: Uuid) -> GenerateRequest {
        GenerateRequest {
            name: "Asha".into(),
            roll: "21CS01".into(),
            reg: "REG001".into(),
            semester_id: 1,
            subject_id,
            stream_id: 1,
            format: ArtifactFormat::Png,
        }
    }

    #[tokio::test]
    async fn generate_renders_logs_and_names_the_artifact() {
        let (fx, subject_id) = fixture().await;
        let cover = fx.orchestrator.generate(request(subject_id)).await.unwrap();

        assert_eq!(cover.mime_type, "image/png");
        assert_eq!(cover.file_name, "Asha-Data-Structures-FrontPageCover.png");
        assert!(cover.ledger_warning.is_none());

        // the stub renderer echoes the resolved fields
        let body = String::from_utf8(cover.bytes).unwrap();
        for field in ["Asha", "21CS01", "REG001", "CSE", "1ST", "CS201", "Data Structures"] {
            assert!(body.contains(field), "missing {field}");
        }

        assert_eq!(fx.orchestrator.total_generated().unwrap(), 1);
        let recent = fx.orchestrator.recent_logs(10).unwrap();
        assert_eq!(recent[0].subject_code, "CS201");
        assert_eq!(recent[0].subject_name, "Data Structures");
        assert_eq!(recent[0].stream_label, "CSE");
        assert_eq!(recent[0].semester_label, "1ST");
    }

    #[tokio::test]
    async fn subject_not_offered_in_semester_is_rejected_before_logging() {
        let (fx, subject_id) = fixture().await;
        let mut req = request(subject_id);
        req.semester_id = 2;

        let err = fx.orchestrator.generate(req).await.unwrap_err();
        assert!(matches!(err, GenerateError::InvalidSelection(_)));
        assert_eq!(fx.orchestrator.total_generated().unwrap(), 0);
    }

    #[tokio::test]
    async fn unknown_stream_is_invalid_selection() {
        let (fx, subject_id) = fixture().await;
        let mut req = request(subject_id);
        req.stream_id = 99;

        let err = fx.orchestrator.generate(req).await.unwrap_err();
        assert!(matches!(err, GenerateError::InvalidSelection(_)));
    }

    #[tokio::test]
    async fn blank_name_is_invalid_selection() {
        let (fx, subject_id) = fixture().await;
        let mut req = request(subject_id);
        req.name = "   ".into();

        let err = fx.orchestrator.generate(req).await.unwrap_err();
        assert!(matches!(err, GenerateError::InvalidSelection(msg) if msg.contains("name")));
    }

    #[tokio::test]
    async fn display_alias_reaches_artifact_ledger_and_file_name() {
        let (fx, _) = fixture().await;
        let catalog = fx.orchestrator.catalog();
        catalog.upsert_stream(3, "ECE").await.unwrap();
        let m = catalog
            .add_or_update_subject("Data Structures & Algorithms Lab", "EC391", 3)
            .await
            .unwrap();

        let mut req = request(m.subject_id);
        req.semester_id = 3;
        req.stream_id = 3;
        let cover = fx.orchestrator.generate(req).await.unwrap();

        let body = String::from_utf8(cover.bytes).unwrap();
        assert!(body.contains("Data Structure Lab"));
        assert!(!body.contains("Algorithms"));
        // code still belongs to the subject record
        assert!(body.contains("EC391"));
        assert_eq!(cover.file_name, "Asha-Data-Structure-Lab-FrontPageCover.png");

        let recent = fx.orchestrator.recent_logs(1).unwrap();
        assert_eq!(recent[0].subject_name, "Data Structure Lab");
        assert_eq!(recent[0].subject_code, "EC391");
    }

    #[tokio::test]
    async fn alias_does_not_apply_under_other_streams() {
        let (fx, _) = fixture().await;
        let catalog = fx.orchestrator.catalog();
        let m = catalog
            .add_or_update_subject("Data Structures & Algorithms Lab", "CS391", 1)
            .await
            .unwrap();

        let mut req = request(m.subject_id);
        let cover = fx.orchestrator.generate(req.clone()).await.unwrap();
        let body = String::from_utf8(cover.bytes).unwrap();
        assert!(body.contains("Data Structures & Algorithms Lab"));
        req.format = ArtifactFormat::Pdf;
        let pdf = fx.orchestrator.generate(req).await.unwrap();
        assert_eq!(pdf.mime_type, "application/pdf");
        assert!(pdf.file_name.ends_with(".pdf"));
    }

    #[tokio::test]
    async fn ledger_failure_still_returns_the_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let ledger_path = dir.path().join("ledger.jsonl");
        let ledger = Arc::new(GenerationLedger::open(&ledger_path).unwrap());
        // make the append fail: a directory now squats on the ledger path
        fs::create_dir(&ledger_path).unwrap();

        let catalog = Arc::new(CatalogService::new(Arc::new(InMemoryCatalogStore::new())));
        catalog.upsert_stream(1, "CSE").await.unwrap();
        let m = catalog
            .add_or_update_subject("Data Structures", "CS201", 1)
            .await
            .unwrap();
        let orchestrator = Orchestrator::new(catalog, Arc::new(NullCoverRenderer), ledger);

        let cover = orchestrator.generate(request(m.subject_id)).await.unwrap();
        assert!(cover.ledger_warning.is_some());
        assert!(!cover.bytes.is_empty());
    }

    #[tokio::test]
    async fn count_grows_by_one_per_success() {
        let (fx, subject_id) = fixture().await;
        for _ in 0..3 {
            fx.orchestrator.generate(request(subject_id)).await.unwrap();
        }
        assert_eq!(fx.orchestrator.total_generated().unwrap(), 3);
        assert_eq!(fx.orchestrator.recent_logs(2).unwrap().len(), 2);
    }
}
