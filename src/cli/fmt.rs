use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use kinship::{Config, PersonGraph, gedcom};
use tracing::instrument;

#[derive(Debug, Parser)]
#[command(about = "Rewrite a GEDCOM file in canonical form")]
pub struct Fmt {
    /// The GEDCOM file to format
    file: PathBuf,

    /// Locale whose names are written first (defaults to the configured one)
    #[arg(long)]
    locale: Option<String>,

    /// Write here instead of replacing the input
    #[arg(long, short, conflicts_with = "stdout")]
    output: Option<PathBuf>,

    /// Print the result instead of writing a file
    #[arg(long)]
    stdout: bool,
}

impl Fmt {
    #[instrument(level = "debug", skip(config))]
    pub fn run(self, config: &Config) -> anyhow::Result<()> {
        let text = std::fs::read_to_string(&self.file)
            .with_context(|| format!("failed to read {}", self.file.display()))?;

        let locale = self.locale.as_deref().unwrap_or(&config.locale);
        let formatted = format_text(&text, &config.locale, locale)
            .with_context(|| format!("failed to format {}", self.file.display()))?;

        if self.stdout {
            print!("{formatted}");
            return Ok(());
        }

        let target = self.output.as_ref().unwrap_or(&self.file);
        std::fs::write(target, formatted)
            .with_context(|| format!("failed to write {}", target.display()))?;
        tracing::info!("Formatted {}", target.display());

        Ok(())
    }
}

/// Parses `text` and writes it back out with `locale` as the primary locale.
///
/// Parse warnings are logged; the records they describe are dropped.
fn format_text(text: &str, default_locale: &str, locale: &str) -> anyhow::Result<String> {
    let parsed = gedcom::parse_with_locale(text, default_locale)?;
    for warning in &parsed.warnings {
        tracing::warn!("{warning}");
    }

    let mut graph = PersonGraph::from_people(parsed.people)?;
    let repaired = graph.reconcile();
    if !repaired.is_empty() {
        tracing::warn!("Repaired inconsistent links: {repaired:?}");
    }

    Ok(gedcom::build(graph.people(), locale, gedcom::default_labels)?)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    const MESSY: &str = "0 HEAD\r\n\
        0 @I1@ INDI\r\n  1   NAME   Ada /Byron/\r\n1 SEX F\r\n\
        1 NAME Ада /Байрон/\r\n2 LANG ru\r\n\
        0 TRLR\r\n";

    fn fmt(file: PathBuf, output: Option<PathBuf>, locale: Option<&str>) -> Fmt {
        Fmt {
            file,
            locale: locale.map(str::to_string),
            output,
            stdout: false,
        }
    }

    #[test]
    fn rewrites_in_place() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("tree.ged");
        fs::write(&path, MESSY).unwrap();

        fmt(path.clone(), None, None).run(&Config::default()).unwrap();

        let written = fs::read_to_string(&path).unwrap();
        assert!(written.starts_with("0 HEAD\n"));
        assert!(written.contains("0 @I1@ INDI\n"));
        assert!(written.trim_end().ends_with("0 TRLR"));
        assert!(!written.contains('\r'));
    }

    #[test]
    fn formatting_is_idempotent() {
        let once = format_text(MESSY, "en", "en").unwrap();
        let twice = format_text(&once, "en", "en").unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn locale_picks_the_primary_name() {
        let russian = format_text(MESSY, "en", "ru").unwrap();
        let first_name = russian
            .lines()
            .find(|line| line.starts_with("1 NAME"))
            .unwrap();
        assert!(first_name.contains("Ада"), "{russian}");
    }

    #[test]
    fn writes_to_output_path() {
        let tmp = tempdir().unwrap();
        let input = tmp.path().join("in.ged");
        let output = tmp.path().join("out.ged");
        fs::write(&input, MESSY).unwrap();

        fmt(input.clone(), Some(output.clone()), Some("en"))
            .run(&Config::default())
            .unwrap();

        assert_eq!(fs::read_to_string(&input).unwrap(), MESSY);
        assert!(fs::read_to_string(&output).unwrap().contains("Ada"));
    }

    #[test]
    fn malformed_input_is_an_error() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("tree.ged");
        fs::write(&path, "garbage\n").unwrap();

        assert!(fmt(path, None, None).run(&Config::default()).is_err());
    }
}
