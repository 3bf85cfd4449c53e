use crate::config::STATEMENT_PLACEHOLDER;
use crate::error::{ProbeError, Result};
use crate::generate::Generator;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One ideology-probe statement and the model's response to it.
///
/// Record order is significant: it is positionally matched against
/// classifier output and quiz question identifiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementRecord {
    pub statement: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
}

/// Fixed delay inserted every N statements to respect rate limits
#[derive(Debug, Clone, Copy)]
pub struct Pacing {
    pause: Duration,
    interval: usize,
}

impl Pacing {
    /// A zero interval is clamped to 1 so the pause cadence is always
    /// well defined.
    pub fn new(pause: Duration, interval: usize) -> Self {
        Self {
            pause,
            interval: interval.max(1),
        }
    }

    pub fn none() -> Self {
        Self::new(Duration::ZERO, 1)
    }
}

/// Load the ordered statement sequence from a template or response file
pub fn load_records(path: &Path) -> Result<Vec<StatementRecord>> {
    let content = std::fs::read_to_string(path).map_err(|err| match err.kind() {
        std::io::ErrorKind::NotFound => ProbeError::NotFound {
            path: path.to_path_buf(),
        },
        _ => ProbeError::Io(err),
    })?;

    serde_json::from_str(&content)
        .map_err(|err| ProbeError::MalformedInput(format!("{}: {err}", path.display())))
}

/// Fill in a response for every statement that does not have one yet.
///
/// Strictly sequential: one generator call per record, in order. The
/// placeholder check runs before any external call so a bad template cannot
/// waste quota. Per-statement failures are logged and skipped, leaving the
/// record's response absent so a rerun can resume.
pub async fn generate_all(
    records: &mut [StatementRecord],
    generator: &dyn Generator,
    prompt_template: &str,
    pacing: Pacing,
) -> Result<()> {
    if !prompt_template.contains(STATEMENT_PLACEHOLDER) {
        return Err(ProbeError::InvalidConfiguration(format!(
            "prompt template must contain {STATEMENT_PLACEHOLDER}"
        )));
    }

    let total = records.len();
    for (i, record) in records.iter_mut().enumerate() {
        if record.response.is_some() {
            debug!(index = i, "response already present, skipping");
            continue;
        }

        let prompt = prompt_template.replace(STATEMENT_PLACEHOLDER, &record.statement);
        match generator.generate(&prompt).await {
            Ok(response) => {
                info!(index = i, total, "generated response");
                record.response = Some(extract_opinion(&response));
            }
            Err(err) => {
                warn!(index = i, error = %err, "generation failed, leaving response absent");
            }
        }

        if !pacing.pause.is_zero() && i % pacing.interval == 0 {
            tokio::time::sleep(pacing.pause).await;
        }
    }
    Ok(())
}

/// Keep only the `<opinion>` section of a sectioned response.
///
/// The chain-of-thought prompt asks for reaction/reasoning/opinion
/// sections; the stance lives in the last one. Responses without an
/// `<opinion>` marker pass through unchanged.
fn extract_opinion(response: &str) -> String {
    match response.rsplit_once("<opinion>") {
        Some((_, rest)) => rest.replace("</opinion>", "").trim().to_string(),
        None => response.to_string(),
    }
}

/// Persist the enriched record sequence as pretty-printed JSON
pub fn persist(records: &[StatementRecord], path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(records)?;
    std::fs::write(path, json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate::tests::StubGenerator;
    use tempfile::tempdir;

    fn records(statements: &[&str]) -> Vec<StatementRecord> {
        statements
            .iter()
            .map(|s| StatementRecord {
                statement: s.to_string(),
                response: None,
            })
            .collect()
    }

    #[test]
    fn test_load_records_missing_file() {
        let err = load_records(Path::new("/nonexistent/example.json")).unwrap_err();
        assert!(matches!(err, ProbeError::NotFound { .. }));
    }

    #[test]
    fn test_load_records_malformed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("example.json");
        std::fs::write(&path, "this is not json").unwrap();
        let err = load_records(&path).unwrap_err();
        assert!(matches!(err, ProbeError::MalformedInput(_)));
    }

    #[test]
    fn test_load_records_template_without_responses() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("example.json");
        std::fs::write(
            &path,
            r#"[{"statement": "A"}, {"statement": "B", "response": "text"}]"#,
        )
        .unwrap();
        let loaded = load_records(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].statement, "A");
        assert_eq!(loaded[0].response, None);
        assert_eq!(loaded[1].response.as_deref(), Some("text"));
    }

    #[tokio::test]
    async fn test_generate_all_fills_responses_in_order() {
        let mut recs = records(&["A", "B"]);
        let generator = StubGenerator::echoing();
        generate_all(
            &mut recs,
            &generator,
            "Respond: {{STATEMENT}}",
            Pacing::none(),
        )
        .await
        .unwrap();
        assert_eq!(recs[0].response.as_deref(), Some("echo: Respond: A"));
        assert_eq!(recs[1].response.as_deref(), Some("echo: Respond: B"));
    }

    #[tokio::test]
    async fn test_generate_all_rejects_template_without_placeholder() {
        let mut recs = records(&["A"]);
        let generator = StubGenerator::echoing();
        let err = generate_all(&mut recs, &generator, "no placeholder here", Pacing::none())
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::InvalidConfiguration(_)));
        // Fails fast: no external call issued.
        assert_eq!(generator.calls(), 0);
    }

    #[tokio::test]
    async fn test_generate_all_skips_failed_statements() {
        let mut recs = records(&["A", "fail", "C"]);
        let generator = StubGenerator::failing_on("fail");
        generate_all(&mut recs, &generator, "{{STATEMENT}}", Pacing::none())
            .await
            .unwrap();
        assert!(recs[0].response.is_some());
        assert!(recs[1].response.is_none());
        assert!(recs[2].response.is_some());
    }

    #[tokio::test]
    async fn test_generate_all_idempotent_with_pure_generator() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model.json");
        let mut recs = records(&["A", "B"]);
        let generator = StubGenerator::echoing();
        let template = "Respond: {{STATEMENT}}";

        generate_all(&mut recs, &generator, template, Pacing::none())
            .await
            .unwrap();
        persist(&recs, &path).unwrap();
        let first = std::fs::read_to_string(&path).unwrap();

        generate_all(&mut recs, &generator, template, Pacing::none())
            .await
            .unwrap();
        persist(&recs, &path).unwrap();
        let second = std::fs::read_to_string(&path).unwrap();

        assert_eq!(first, second);
        // Second pass found everything populated and made no calls.
        assert_eq!(generator.calls(), 2);
    }

    #[tokio::test]
    async fn test_generate_all_keeps_only_opinion_section() {
        struct SectionedGenerator;
        #[async_trait::async_trait]
        impl crate::generate::Generator for SectionedGenerator {
            async fn generate(&self, _prompt: &str) -> crate::error::Result<String> {
                Ok("<reaction>\nA gut feeling.\n</reaction>\n\
                    <reasoning>\nSome analysis.\n</reasoning>\n\
                    <opinion>\nI firmly agree.\n</opinion>"
                    .to_string())
            }
        }
        let mut recs = records(&["A"]);
        generate_all(&mut recs, &SectionedGenerator, "{{STATEMENT}}", Pacing::none())
            .await
            .unwrap();
        assert_eq!(recs[0].response.as_deref(), Some("I firmly agree."));
    }

    #[test]
    fn test_extract_opinion_passes_plain_responses_through() {
        assert_eq!(extract_opinion("I simply agree."), "I simply agree.");
    }

    #[tokio::test]
    async fn test_zero_pause_interval_is_clamped() {
        let mut recs = records(&["A", "B", "C"]);
        let generator = StubGenerator::echoing();
        let pacing = Pacing::new(Duration::from_millis(1), 0);
        generate_all(&mut recs, &generator, "{{STATEMENT}}", pacing)
            .await
            .unwrap();
        assert!(recs.iter().all(|record| record.response.is_some()));
    }

    #[tokio::test]
    async fn test_persist_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("model.json");
        let mut recs = records(&["A"]);
        recs[0].response = Some("a response".to_string());
        persist(&recs, &path).unwrap();
        let loaded = load_records(&path).unwrap();
        assert_eq!(loaded, recs);
    }
}
