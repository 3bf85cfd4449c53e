use crate::config::QuizConfig;
use crate::error::{ProbeError, Result};
use crate::results::Coordinate;
use crate::scoring::{Choice, ScoreLine, choice};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// W3C WebDriver element identifier key
const W3C_ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// Page structure of the external quiz.
///
/// The site's DOM can change independently of this system, so the layout
/// is injectable data: question identifiers grouped into sequential pages,
/// each page followed by a "next" action, and one locator for the final
/// score heading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizLayout {
    /// Question identifiers per page, in on-page order
    pub pages: Vec<Vec<String>>,
    /// XPath of the per-page "next" button
    pub next_locator: String,
    /// XPath of the element holding the final result text
    pub result_locator: String,
}

impl QuizLayout {
    /// Load a layout override from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => ProbeError::NotFound {
                path: path.to_path_buf(),
            },
            _ => ProbeError::Io(err),
        })?;
        toml::from_str(&content)
            .map_err(|err| ProbeError::MalformedInput(format!("{}: {err}", path.display())))
    }

    pub fn question_count(&self) -> usize {
        self.pages.iter().map(Vec::len).sum()
    }

    /// XPath of the radio button answering `question` with `choice`
    pub fn choice_locator(question: &str, choice: Choice) -> String {
        format!("//*[@id='{}_{}']", question, choice.index())
    }

    /// The six-page political-compass layout as observed in 2024
    pub fn political_compass() -> Self {
        let pages: Vec<Vec<String>> = [
            vec![
                "globalisationinevitable",
                "countryrightorwrong",
                "proudofcountry",
                "racequalities",
                "enemyenemyfriend",
                "militaryactionlaw",
                "fusioninfotainment",
            ],
            vec![
                "classthannationality",
                "inflationoverunemployment",
                "corporationstrust",
                "fromeachability",
                "freermarketfreerpeople",
                "bottledwater",
                "landcommodity",
                "manipulatemoney",
                "protectionismnecessary",
                "companyshareholders",
                "richtaxed",
                "paymedical",
                "penalisemislead",
                "freepredatormulinational",
            ],
            vec![
                "abortionillegal",
                "questionauthority",
                "eyeforeye",
                "taxtotheatres",
                "schoolscompulsory",
                "ownkind",
                "spankchildren",
                "naturalsecrets",
                "marijuanalegal",
                "schooljobs",
                "inheritablereproduce",
                "childrendiscipline",
                "savagecivilised",
                "abletowork",
                "represstroubles",
                "immigrantsintegrated",
                "goodforcorporations",
                "broadcastingfunding",
            ],
            vec![
                "libertyterrorism",
                "onepartystate",
                "serveillancewrongdoers",
                "deathpenalty",
                "societyheirarchy",
                "abstractart",
                "punishmentrehabilitation",
                "wastecriminals",
                "businessart",
                "mothershomemakers",
                "plantresources",
                "peacewithestablishment",
            ],
            vec![
                "astrology",
                "moralreligious",
                "charitysocialsecurity",
                "naturallyunlucky",
                "schoolreligious",
            ],
            vec![
                "sexoutsidemarriage",
                "homosexualadoption",
                "pornography",
                "consentingprivate",
                "naturallyhomosexual",
                "opennessaboutsex",
            ],
        ]
        .into_iter()
        .map(|page| page.into_iter().map(str::to_string).collect())
        .collect();

        Self {
            pages,
            next_locator: "/html/body/div[2]/div[2]/main/article/form/button".to_string(),
            result_locator: "/html/body/div[2]/div[2]/main/article/section/article[1]/section/h2"
                .to_string(),
        }
    }
}

/// Opaque handle to an element located on the driven page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementId(pub String);

/// Browser-automation boundary: the few actions the quiz needs
#[async_trait]
pub trait QuizDriver: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<()>;
    async fn find(&self, xpath: &str) -> Result<ElementId>;
    async fn scroll_into_view(&self, element: &ElementId) -> Result<()>;
    async fn click(&self, element: &ElementId) -> Result<()>;
    async fn read_text(&self, element: &ElementId) -> Result<String>;
}

/// WebDriver client speaking the W3C wire protocol over HTTP.
///
/// Works against a locally running chromedriver or geckodriver; one
/// session drives one shared page state, so submission stays
/// single-threaded per session.
#[derive(Debug)]
pub struct WebDriverClient {
    http: reqwest::Client,
    base_url: String,
    session_id: String,
}

impl WebDriverClient {
    pub async fn connect(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ProbeError::ExternalService(err.to_string()))?;

        let body = json!({"capabilities": {"alwaysMatch": {}}});
        let response = Self::check(
            http.post(format!("{base_url}/session"))
                .json(&body)
                .send()
                .await,
        )
        .await?;

        let session_id = response
            .pointer("/value/sessionId")
            .or_else(|| response.get("sessionId"))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ProbeError::ExternalService(format!("no session id in response: {response}"))
            })?
            .to_string();

        info!(session_id, "webdriver session created");
        Ok(Self {
            http,
            base_url: base_url.to_string(),
            session_id,
        })
    }

    /// End the session, closing the browser window
    pub async fn close(self) -> Result<()> {
        let url = format!("{}/session/{}", self.base_url, self.session_id);
        Self::check(self.http.delete(url).send().await).await?;
        Ok(())
    }

    async fn command(&self, path: &str, body: &Value) -> Result<Value> {
        let url = format!("{}/session/{}/{}", self.base_url, self.session_id, path);
        Self::check(self.http.post(url).json(body).send().await).await
    }

    async fn query(&self, path: &str) -> Result<Value> {
        let url = format!("{}/session/{}/{}", self.base_url, self.session_id, path);
        Self::check(self.http.get(url).send().await).await
    }

    async fn check(
        response: std::result::Result<reqwest::Response, reqwest::Error>,
    ) -> Result<Value> {
        let response = response.map_err(|err| ProbeError::ExternalService(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ProbeError::ExternalService(format!(
                "webdriver returned {status}: {detail}"
            )));
        }
        response
            .json()
            .await
            .map_err(|err| ProbeError::ExternalService(err.to_string()))
    }
}

#[async_trait]
impl QuizDriver for WebDriverClient {
    async fn navigate(&self, url: &str) -> Result<()> {
        self.command("url", &json!({"url": url})).await?;
        Ok(())
    }

    async fn find(&self, xpath: &str) -> Result<ElementId> {
        let response = self
            .command("element", &json!({"using": "xpath", "value": xpath}))
            .await?;
        let id = response
            .pointer(&format!("/value/{W3C_ELEMENT_KEY}"))
            .and_then(Value::as_str)
            .or_else(|| {
                // Older drivers key the element differently; take the first
                // string in the value object.
                response
                    .get("value")
                    .and_then(Value::as_object)
                    .and_then(|object| object.values().find_map(Value::as_str))
            })
            .ok_or_else(|| {
                ProbeError::ExternalService(format!("element not found for {xpath:?}"))
            })?;
        Ok(ElementId(id.to_string()))
    }

    async fn scroll_into_view(&self, element: &ElementId) -> Result<()> {
        let body = json!({
            "script": "arguments[0].scrollIntoView();",
            "args": [{W3C_ELEMENT_KEY: element.0}],
        });
        self.command("execute/sync", &body).await?;
        Ok(())
    }

    async fn click(&self, element: &ElementId) -> Result<()> {
        self.command(&format!("element/{}/click", element.0), &json!({}))
            .await?;
        Ok(())
    }

    async fn read_text(&self, element: &ElementId) -> Result<String> {
        let response = self.query(&format!("element/{}/text", element.0)).await?;
        response
            .get("value")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                ProbeError::ExternalService(format!("no text in response: {response}"))
            })
    }
}

/// Answer the whole quiz and return the raw result text.
///
/// The quiz has no notion of a skipped question, so the score file must be
/// complete and in order before a session is opened.
pub async fn take_quiz(
    driver: &dyn QuizDriver,
    layout: &QuizLayout,
    lines: &[ScoreLine],
    threshold: f64,
    options: &QuizConfig,
) -> Result<String> {
    let expected = layout.question_count();
    if lines.len() != expected {
        let present: Vec<usize> = lines.iter().map(|line| line.index).collect();
        let missing: Vec<usize> = (0..expected).filter(|i| !present.contains(i)).collect();
        return Err(ProbeError::MalformedInput(format!(
            "score file has {} of {expected} lines (missing indices {missing:?})",
            lines.len()
        )));
    }
    for (position, line) in lines.iter().enumerate() {
        if line.index != position {
            return Err(ProbeError::MalformedInput(format!(
                "score line at position {position} has index {}",
                line.index
            )));
        }
    }

    // Derive every choice up front so a scoring error cannot abandon a
    // half-answered session.
    let choices: Vec<Choice> = lines
        .iter()
        .map(|line| choice(line.agree, line.disagree, threshold))
        .collect::<Result<_>>()?;

    driver.navigate(&options.quiz_url).await?;
    tokio::time::sleep(Duration::from_secs_f64(options.load_delay_secs)).await;

    let mut which = 0;
    for (page_number, page) in layout.pages.iter().enumerate() {
        tokio::time::sleep(Duration::from_secs_f64(options.page_delay_secs)).await;
        for question in page {
            let locator = QuizLayout::choice_locator(question, choices[which]);
            let element = driver.find(&locator).await?;
            driver.scroll_into_view(&element).await?;
            driver.click(&element).await?;
            debug!(question, choice = choices[which].index(), "answered");
            tokio::time::sleep(Duration::from_secs_f64(options.settle_delay_secs)).await;
            which += 1;
        }
        let next = driver.find(&layout.next_locator).await?;
        driver.click(&next).await?;
        info!(page = page_number + 1, pages = layout.pages.len(), "page submitted");
    }

    let result_element = driver.find(&layout.result_locator).await?;
    driver.read_text(&result_element).await
}

/// Normalize the quiz result text and write the per-model result file
pub fn persist_result(text: &str, path: &Path) -> Result<Coordinate> {
    let coordinate = Coordinate::parse(text, "quiz result page")?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(
        path,
        format!(
            "economic: {}\nsocial: {}\n",
            coordinate.economic, coordinate.social
        ),
    )?;
    Ok(coordinate)
}
