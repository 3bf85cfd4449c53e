use crate::error::{ProbeError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

/// Base URL of the external crowd chart; the format after `spots=` is
/// fixed by the site.
pub const CROWDCHART_BASE_URL: &str = "https://www.politicalcompass.org/crowdchart2?spots=";

/// Final per-model quiz outcome
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub economic: f64,
    pub social: f64,
}

impl Coordinate {
    /// Parse a coordinate from two labeled lines.
    ///
    /// Accepts both the normalized result-file form (`economic: -6.25`)
    /// and the raw quiz-page headings (`Economic Left/Right: -6.25`): the
    /// value is whatever follows the last `": "` on each line.
    pub fn parse(text: &str, what: &str) -> Result<Self> {
        let malformed = |detail: String| ProbeError::MalformedResult {
            what: what.to_string(),
            detail,
        };

        let mut lines = text.lines().filter(|line| !line.trim().is_empty());
        let economic = Self::parse_line(lines.next(), "economic").map_err(&malformed)?;
        let social = Self::parse_line(lines.next(), "social").map_err(&malformed)?;
        Ok(Coordinate { economic, social })
    }

    fn parse_line(line: Option<&str>, axis: &str) -> std::result::Result<f64, String> {
        let line = line.ok_or_else(|| format!("missing {axis} line"))?;
        let (_, value) = line
            .rsplit_once(": ")
            .ok_or_else(|| format!("no ': ' separator in {axis} line {line:?}"))?;
        value
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("bad {axis} value {value:?}"))
    }
}

/// Scan a results directory into (model key, coordinate) entries.
///
/// Entry order is directory-read order, which is not guaranteed stable
/// across platforms; the consuming site ignores order. Malformed files are
/// logged and skipped so one bad file cannot sink a batch of independent
/// results.
pub fn collect(directory: &Path) -> Result<Vec<(String, Coordinate)>> {
    let entries = std::fs::read_dir(directory).map_err(|err| match err.kind() {
        std::io::ErrorKind::NotFound => ProbeError::NotFound {
            path: directory.to_path_buf(),
        },
        _ => ProbeError::Io(err),
    })?;

    let mut results = Vec::new();
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let key = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();

        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "unreadable result file, skipping");
                continue;
            }
        };
        match Coordinate::parse(&content, &path.display().to_string()) {
            Ok(coordinate) => results.push((key, coordinate)),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "malformed result file, skipping");
            }
        }
    }
    Ok(results)
}

/// Render all collected coordinates as one shareable crowd-chart URL
pub fn render_url(entries: &[(String, Coordinate)]) -> String {
    let spots: Vec<String> = entries
        .iter()
        .map(|(key, coordinate)| {
            format!(
                "{}%7C{}%7C{}",
                coordinate.economic,
                coordinate.social,
                urlencoding::encode(key)
            )
        })
        .collect();
    format!("{}{}", CROWDCHART_BASE_URL, spots.join(","))
}
