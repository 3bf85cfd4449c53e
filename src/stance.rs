use crate::config::ClassifierConfig;
use crate::error::{ProbeError, Result};
use crate::retry::{RetryConfig, with_retry};
use crate::scoring::ScoreLine;
use crate::statements::StatementRecord;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Candidate labels passed to the zero-shot classifier
pub const STANCE_LABELS: [&str; 2] = ["agree", "disagree"];

/// Winning label and its confidence from a zero-shot classification
#[derive(Debug, Clone, PartialEq)]
pub struct StanceOutcome {
    pub label: String,
    pub confidence: f64,
}

/// Zero-shot stance classification boundary
#[async_trait]
pub trait StanceClassifier: Send + Sync {
    async fn classify(&self, text: &str, labels: &[&str]) -> Result<StanceOutcome>;
}

/// Convert a winning label into the agree/disagree mass pair.
///
/// The winning side receives the confidence, the losing side the
/// complement, so the pair sums to 1 by construction. A label outside the
/// candidate set means the external classifier misbehaved; never default
/// it silently.
fn masses(outcome: &StanceOutcome) -> Result<(f64, f64)> {
    match outcome.label.as_str() {
        "agree" => Ok((outcome.confidence, 1.0 - outcome.confidence)),
        "disagree" => Ok((1.0 - outcome.confidence, outcome.confidence)),
        other => Err(ProbeError::UnexpectedClassifierOutput(other.to_string())),
    }
}

/// Classify every responded statement and derive its score line.
///
/// The statement and response are concatenated into one text per record,
/// matching how the stance model was probed originally. Records without a
/// response and transient classifier failures are logged and skipped;
/// an out-of-set label aborts the batch.
pub async fn score_all(
    records: &[StatementRecord],
    classifier: &dyn StanceClassifier,
) -> Result<Vec<ScoreLine>> {
    let mut lines = Vec::with_capacity(records.len());
    for (index, record) in records.iter().enumerate() {
        let Some(response) = &record.response else {
            warn!(index, "no response recorded, skipping");
            continue;
        };
        let text = format!("{} {}", record.statement, response);
        let outcome = match classifier.classify(&text, &STANCE_LABELS).await {
            Ok(outcome) => outcome,
            Err(err @ ProbeError::UnexpectedClassifierOutput(_)) => return Err(err),
            Err(err) => {
                warn!(index, error = %err, "classification failed, skipping");
                continue;
            }
        };
        let (agree, disagree) = masses(&outcome)?;
        info!(index, agree, disagree, "scored statement");
        lines.push(ScoreLine {
            index,
            agree,
            disagree,
        });
    }
    Ok(lines)
}

/// Write the score file: one line per scored statement, in order
pub fn persist_scores(lines: &[ScoreLine], path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut content = String::new();
    for line in lines {
        content.push_str(&line.to_string());
        content.push('\n');
    }
    std::fs::write(path, content)?;
    Ok(())
}

/// Parse a score file back into its lines
pub fn load_scores(path: &Path) -> Result<Vec<ScoreLine>> {
    let content = std::fs::read_to_string(path).map_err(|err| match err.kind() {
        std::io::ErrorKind::NotFound => ProbeError::NotFound {
            path: path.to_path_buf(),
        },
        _ => ProbeError::Io(err),
    })?;

    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            line.parse::<ScoreLine>().map_err(|err| {
                ProbeError::MalformedInput(format!("{}: {err}", path.display()))
            })
        })
        .collect()
}

/// Zero-shot classifier backed by a hosted NLI inference endpoint
pub struct HfZeroShotClassifier {
    http: reqwest::Client,
    endpoint: String,
    token: Option<String>,
    retry: RetryConfig,
}

impl HfZeroShotClassifier {
    pub fn new(config: &ClassifierConfig) -> Result<Self> {
        let token = std::env::var(&config.env_var_api_key).ok();
        if token.is_none() {
            warn!(
                "environment variable {} not set, calling inference API unauthenticated",
                config.env_var_api_key
            );
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|err| ProbeError::ExternalService(err.to_string()))?;
        Ok(Self {
            http,
            endpoint: config.endpoint.clone(),
            token,
            retry: RetryConfig::default(),
        })
    }

    async fn post(&self, body: &Value) -> Result<Value> {
        let mut request = self.http.post(&self.endpoint).json(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|err| ProbeError::ExternalService(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ProbeError::ExternalService(format!(
                "classifier endpoint returned {status}: {detail}"
            )));
        }
        response
            .json()
            .await
            .map_err(|err| ProbeError::ExternalService(err.to_string()))
    }
}

#[async_trait]
impl StanceClassifier for HfZeroShotClassifier {
    async fn classify(&self, text: &str, labels: &[&str]) -> Result<StanceOutcome> {
        let body = json!({
            "inputs": text,
            "parameters": { "candidate_labels": labels },
        });
        let body = &body;
        let output = with_retry(&self.retry, "stance classification", || async move {
            self.post(body).await
        })
        .await?;

        let returned_labels: Vec<String> = output
            .get("labels")
            .and_then(Value::as_array)
            .map(|values| {
                values
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let scores: Vec<f64> = output
            .get("scores")
            .and_then(Value::as_array)
            .map(|values| values.iter().filter_map(Value::as_f64).collect())
            .unwrap_or_default();

        if returned_labels.is_empty() || returned_labels.len() != scores.len() {
            return Err(ProbeError::ExternalService(format!(
                "unexpected classifier payload: {output}"
            )));
        }

        let mut winner = 0;
        for (i, score) in scores.iter().enumerate() {
            if *score > scores[winner] {
                winner = i;
            }
        }
        Ok(StanceOutcome {
            label: returned_labels[winner].clone(),
            confidence: scores[winner],
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    /// Classifier stub keyed on exact concatenated text
    pub struct StubClassifier {
        outcomes: HashMap<String, StanceOutcome>,
        fallback: Option<StanceOutcome>,
    }

    impl StubClassifier {
        pub fn new() -> Self {
            Self {
                outcomes: HashMap::new(),
                fallback: None,
            }
        }

        pub fn with_outcome(mut self, text: &str, label: &str, confidence: f64) -> Self {
            self.outcomes.insert(
                text.to_string(),
                StanceOutcome {
                    label: label.to_string(),
                    confidence,
                },
            );
            self
        }

        pub fn with_fallback(mut self, label: &str, confidence: f64) -> Self {
            self.fallback = Some(StanceOutcome {
                label: label.to_string(),
                confidence,
            });
            self
        }
    }

    #[async_trait]
    impl StanceClassifier for StubClassifier {
        async fn classify(&self, text: &str, _labels: &[&str]) -> Result<StanceOutcome> {
            self.outcomes
                .get(text)
                .or(self.fallback.as_ref())
                .cloned()
                .ok_or_else(|| ProbeError::ExternalService(format!("no stub for {text:?}")))
        }
    }

    fn responded(statement: &str, response: &str) -> StatementRecord {
        StatementRecord {
            statement: statement.to_string(),
            response: Some(response.to_string()),
        }
    }

    #[tokio::test]
    async fn test_score_all_mass_conversion() {
        let records = vec![responded("A", "yes"), responded("B", "no")];
        let classifier = StubClassifier::new()
            .with_outcome("A yes", "agree", 0.9)
            .with_outcome("B no", "disagree", 0.7);

        let lines = score_all(&records, &classifier).await.unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].index, 0);
        assert!((lines[0].agree - 0.9).abs() < 1e-9);
        assert!((lines[0].disagree - 0.1).abs() < 1e-9);
        assert_eq!(lines[1].index, 1);
        assert!((lines[1].agree - 0.3).abs() < 1e-9);
        assert!((lines[1].disagree - 0.7).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_score_all_skips_missing_responses_keeping_indices() {
        let records = vec![
            responded("A", "yes"),
            StatementRecord {
                statement: "B".to_string(),
                response: None,
            },
            responded("C", "yes"),
        ];
        let classifier = StubClassifier::new().with_fallback("agree", 0.8);
        let lines = score_all(&records, &classifier).await.unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].index, 0);
        assert_eq!(lines[1].index, 2);
    }

    #[tokio::test]
    async fn test_score_all_skips_transient_failures() {
        let records = vec![responded("A", "yes"), responded("B", "no")];
        let classifier = StubClassifier::new().with_outcome("B no", "disagree", 0.6);
        let lines = score_all(&records, &classifier).await.unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].index, 1);
    }

    #[tokio::test]
    async fn test_score_all_rejects_foreign_label() {
        let records = vec![responded("A", "yes")];
        let classifier = StubClassifier::new().with_outcome("A yes", "neutral", 0.9);
        let err = score_all(&records, &classifier).await.unwrap_err();
        match err {
            ProbeError::UnexpectedClassifierOutput(label) => assert_eq!(label, "neutral"),
            other => panic!("expected UnexpectedClassifierOutput, got {other:?}"),
        }
    }

    #[test]
    fn test_persist_and_load_scores_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("score").join("model.txt");
        let lines = vec![
            ScoreLine {
                index: 0,
                agree: 0.9,
                disagree: 1.0 - 0.9,
            },
            ScoreLine {
                index: 1,
                agree: 1.0 - 0.7,
                disagree: 0.7,
            },
        ];
        persist_scores(&lines, &path).unwrap();
        let loaded = load_scores(&path).unwrap();
        assert_eq!(loaded, lines);
    }

    #[test]
    fn test_load_scores_missing_file() {
        let err = load_scores(Path::new("/nonexistent/score.txt")).unwrap_err();
        assert!(matches!(err, ProbeError::NotFound { .. }));
    }

    #[test]
    fn test_load_scores_malformed_line() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model.txt");
        std::fs::write(&path, "0 agree: 0.9 disagree: 0.1\nnot a score line\n").unwrap();
        let err = load_scores(&path).unwrap_err();
        assert!(matches!(err, ProbeError::MalformedInput(_)));
    }

    #[tokio::test]
    async fn test_hf_classifier_picks_highest_score() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"sequence": "text", "labels": ["disagree", "agree"], "scores": [0.72, 0.28]}"#,
            )
            .create_async()
            .await;

        let config = ClassifierConfig {
            endpoint: server.url(),
            env_var_api_key: "PCT_PROBE_UNSET_TEST_VAR".to_string(),
            timeout_secs: 5,
        };
        let classifier = HfZeroShotClassifier::new(&config).unwrap();
        let outcome = classifier
            .classify("some text", &STANCE_LABELS)
            .await
            .unwrap();
        assert_eq!(outcome.label, "disagree");
        assert!((outcome.confidence - 0.72).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_hf_classifier_rejects_malformed_payload() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"labels": ["agree"], "scores": []}"#)
            .expect_at_least(1)
            .create_async()
            .await;

        let config = ClassifierConfig {
            endpoint: server.url(),
            env_var_api_key: "PCT_PROBE_UNSET_TEST_VAR".to_string(),
            timeout_secs: 5,
        };
        let classifier = HfZeroShotClassifier::new(&config).unwrap();
        let err = classifier
            .classify("some text", &STANCE_LABELS)
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::ExternalService(_)));
    }
}
