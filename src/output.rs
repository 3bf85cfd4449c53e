use crate::results::{Coordinate, render_url};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Output format options
#[derive(Debug, Clone, Copy, ValueEnum, Serialize, Deserialize)]
pub enum OutputFormat {
    Plain,
    Json,
}

/// Print the collected coordinates and the shareable chart URL
pub fn print_results(entries: &[(String, Coordinate)], format: OutputFormat) {
    match format {
        OutputFormat::Plain => print_plain(entries),
        OutputFormat::Json => print_json(entries),
    }
}

fn print_plain(entries: &[(String, Coordinate)]) {
    if entries.is_empty() {
        println!("No results collected.");
        return;
    }
    for (key, coordinate) in entries {
        println!(
            "{key}: economic={} social={}",
            coordinate.economic, coordinate.social
        );
    }
    println!();
    println!("{}", render_url(entries));
}

fn print_json(entries: &[(String, Coordinate)]) {
    let models: serde_json::Map<String, serde_json::Value> = entries
        .iter()
        .map(|(key, coordinate)| (key.clone(), json!(coordinate)))
        .collect();
    let document = json!({
        "models": models,
        "url": render_url(entries),
    });
    match serde_json::to_string_pretty(&document) {
        Ok(rendered) => println!("{rendered}"),
        Err(err) => eprintln!("Error serializing results to JSON: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entries() -> Vec<(String, Coordinate)> {
        vec![(
            "model-a".to_string(),
            Coordinate {
                economic: -6.25,
                social: -4.77,
            },
        )]
    }

    #[test]
    fn test_plain_output_does_not_panic() {
        print_results(&sample_entries(), OutputFormat::Plain);
        print_results(&[], OutputFormat::Plain);
    }

    #[test]
    fn test_json_output_does_not_panic() {
        print_results(&sample_entries(), OutputFormat::Json);
        print_results(&[], OutputFormat::Json);
    }

    #[test]
    fn test_json_document_shape() {
        let entries = sample_entries();
        let document = json!({
            "models": entries
                .iter()
                .map(|(k, c)| (k.clone(), json!(c)))
                .collect::<serde_json::Map<_, _>>(),
            "url": render_url(&entries),
        });
        assert_eq!(document["models"]["model-a"]["economic"], json!(-6.25));
        assert!(
            document["url"]
                .as_str()
                .unwrap()
                .starts_with("https://www.politicalcompass.org/crowdchart2?spots=")
        );
    }
}
