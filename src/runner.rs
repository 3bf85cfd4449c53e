use crate::config::{Config, ModelConfig};
use crate::error::{ProbeError, Result};
use crate::generate::{Generator, build_generator};
use crate::quiz::{QuizDriver, QuizLayout, WebDriverClient, take_quiz};
use crate::stance::{HfZeroShotClassifier, StanceClassifier};
use crate::{quiz, stance, statements};
use std::time::Duration;
use tracing::{error, info};

/// Orchestrates the per-model pipeline: respond, score, submit.
///
/// Stages within one model are strictly ordered and share only that
/// model's files. Models run sequentially: the quiz site drives one shared
/// page per browser session and the inference APIs misbehave under
/// concurrent access.
pub struct Runner {
    config: Config,
}

impl Runner {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.config.classifier.timeout_secs)
    }

    /// Models selected by an optional key filter
    fn selected(&self, only: Option<&str>) -> Result<Vec<&ModelConfig>> {
        match only {
            None => Ok(self.config.models.iter().collect()),
            Some(filter) => {
                let matches: Vec<&ModelConfig> = self
                    .config
                    .models
                    .iter()
                    .filter(|model| model.key() == filter || model.model == filter)
                    .collect();
                if matches.is_empty() {
                    return Err(ProbeError::InvalidConfiguration(format!(
                        "no configured model matches {filter:?}"
                    )));
                }
                Ok(matches)
            }
        }
    }

    fn summarize(stage: &str, failures: usize, total: usize) -> Result<()> {
        if failures > 0 {
            return Err(ProbeError::ExternalService(format!(
                "{failures} of {total} model pipeline(s) failed during {stage}"
            )));
        }
        Ok(())
    }

    /// Generate responses for every selected model
    pub async fn respond(&self, only: Option<&str>) -> Result<()> {
        let models = self.selected(only)?;
        let total = models.len();
        let mut failures = 0;
        for model in models {
            info!(model = %model.model, "respond stage starting");
            let outcome = async {
                let generator = build_generator(model, self.call_timeout())?;
                self.respond_with(model, generator.as_ref()).await
            }
            .await;
            if let Err(err) = outcome {
                error!(model = %model.model, error = %err, "respond stage failed");
                failures += 1;
            }
        }
        Self::summarize("respond", failures, total)
    }

    /// Respond stage against an injected generator
    pub async fn respond_with(&self, model: &ModelConfig, generator: &dyn Generator) -> Result<()> {
        let template = model.prompt_template()?;

        // Resume from an earlier partial run when a response file exists.
        let response_path = self.config.response_path(model.key());
        let mut records = if response_path.exists() {
            statements::load_records(&response_path)?
        } else {
            statements::load_records(&self.config.template_path())?
        };

        let pacing = statements::Pacing::new(
            Duration::from_secs_f64(model.pause_secs),
            model.pause_interval,
        );
        statements::generate_all(&mut records, generator, &template, pacing).await?;
        statements::persist(&records, &response_path)?;
        info!(model = %model.model, path = %response_path.display(), "responses persisted");
        Ok(())
    }

    /// Score responses for every selected model
    pub async fn score(&self, only: Option<&str>) -> Result<()> {
        let classifier = HfZeroShotClassifier::new(&self.config.classifier)?;
        let models = self.selected(only)?;
        let total = models.len();
        let mut failures = 0;
        for model in models {
            info!(model = %model.model, "score stage starting");
            if let Err(err) = self.score_with(model, &classifier).await {
                error!(model = %model.model, error = %err, "score stage failed");
                failures += 1;
            }
        }
        Self::summarize("score", failures, total)
    }

    /// Score stage against an injected classifier
    pub async fn score_with(
        &self,
        model: &ModelConfig,
        classifier: &dyn StanceClassifier,
    ) -> Result<()> {
        let records = statements::load_records(&self.config.response_path(model.key()))?;
        let lines = stance::score_all(&records, classifier).await?;
        let score_path = self.config.score_path(model.key());
        stance::persist_scores(&lines, &score_path)?;
        info!(model = %model.model, path = %score_path.display(), "scores persisted");
        Ok(())
    }

    /// Submit the quiz for every selected model
    pub async fn submit(&self, only: Option<&str>) -> Result<()> {
        let layout = self.layout()?;
        let models = self.selected(only)?;
        let total = models.len();
        let mut failures = 0;
        for model in models {
            info!(model = %model.model, "submit stage starting");
            if let Err(err) = self.submit_stage(model, &layout).await {
                error!(model = %model.model, error = %err, "submit stage failed");
                failures += 1;
            }
        }
        Self::summarize("submit", failures, total)
    }

    async fn submit_stage(&self, model: &ModelConfig, layout: &QuizLayout) -> Result<()> {
        let driver = WebDriverClient::connect(
            &self.config.quiz.webdriver_url,
            Duration::from_secs(self.config.quiz.timeout_secs),
        )
        .await?;
        let outcome = self.submit_with(model, &driver, layout).await;
        // Close the browser window even when submission failed.
        let _ = driver.close().await;
        outcome
    }

    /// Submit stage against an injected driver and layout
    pub async fn submit_with(
        &self,
        model: &ModelConfig,
        driver: &dyn QuizDriver,
        layout: &QuizLayout,
    ) -> Result<()> {
        let lines = stance::load_scores(&self.config.score_path(model.key()))?;
        let text = take_quiz(
            driver,
            layout,
            &lines,
            self.config.threshold,
            &self.config.quiz,
        )
        .await?;
        let result_path = self.config.result_path(model.key());
        let coordinate = quiz::persist_result(&text, &result_path)?;
        info!(
            model = %model.model,
            economic = coordinate.economic,
            social = coordinate.social,
            path = %result_path.display(),
            "result persisted"
        );
        Ok(())
    }

    /// Full pipeline for every selected model
    pub async fn run(&self, only: Option<&str>) -> Result<()> {
        let layout = self.layout()?;
        let classifier = HfZeroShotClassifier::new(&self.config.classifier)?;
        let models = self.selected(only)?;
        let total = models.len();
        let mut failures = 0;
        for model in models {
            info!(model = %model.model, "pipeline starting");
            let outcome = async {
                let generator = build_generator(model, self.call_timeout())?;
                self.respond_with(model, generator.as_ref()).await?;
                self.score_with(model, &classifier).await?;
                self.submit_stage(model, &layout).await
            }
            .await;
            if let Err(err) = outcome {
                error!(model = %model.model, error = %err, "pipeline failed");
                failures += 1;
            }
        }
        Self::summarize("run", failures, total)
    }

    fn layout(&self) -> Result<QuizLayout> {
        match &self.config.quiz.layout_path {
            Some(path) => QuizLayout::from_file(path),
            None => Ok(QuizLayout::political_compass()),
        }
    }
}
