use anyhow::Context;
use clap::{Parser, ValueEnum};
use kinship::{Config, TreeClient, TreeRecord, TreeScope};
use regex::RegexBuilder;
use tracing::instrument;

use super::terminal::Colorize;

const HEADERS: [&str; 5] = ["ID", "TITLE", "VISIBILITY", "OWNER", "UPDATED"];

/// Command arguments for `kin list`.
#[derive(Debug, Parser)]
#[command(about = "List own and public trees")]
pub struct List {
    /// Only list public trees
    #[arg(long)]
    public: bool,

    /// Case-insensitive regular expression matched against titles
    #[arg(long, value_name = "REGEX")]
    matching: Option<String>,

    /// Output format (default: table)
    #[arg(long, value_enum, default_value_t)]
    output: OutputFormat,

    /// Print tab-separated rows without headers
    #[arg(long, short)]
    quiet: bool,
}

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum OutputFormat {
    #[default]
    Table,
    Json,
}

impl List {
    #[instrument(level = "debug", skip(self, config))]
    pub async fn run(self, config: &Config) -> anyhow::Result<()> {
        let session = super::session(config)?;

        let trees = if self.public {
            session.client().list_trees(TreeScope::Public).await?
        } else {
            session.list_trees().await?
        };
        let trees = filter(trees, self.matching.as_deref())?;
        tracing::debug!("Listing {} trees", trees.len());

        match self.output {
            OutputFormat::Table => render_table(&trees, self.quiet),
            OutputFormat::Json => {
                serde_json::to_writer_pretty(std::io::stdout(), &trees)
                    .context("failed to render json output")?;
                println!();
            }
        }

        Ok(())
    }
}

fn filter(trees: Vec<TreeRecord>, pattern: Option<&str>) -> anyhow::Result<Vec<TreeRecord>> {
    let Some(pattern) = pattern else {
        return Ok(trees);
    };
    let regex = RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .with_context(|| format!("invalid pattern {pattern:?}"))?;

    Ok(trees
        .into_iter()
        .filter(|tree| tree.title().is_some_and(|title| regex.is_match(title)))
        .collect())
}

fn row(tree: &TreeRecord) -> [String; 5] {
    let visibility = match tree.is_public {
        Some(true) => "public",
        Some(false) => "private",
        None => "-",
    };
    [
        tree.id.to_string(),
        tree.title().unwrap_or("(untitled)").to_string(),
        visibility.to_string(),
        tree.owner.clone().unwrap_or_else(|| "-".to_string()),
        tree.updated_at
            .or(tree.created_at)
            .map_or_else(|| "-".to_string(), |at| at.format("%Y-%m-%d").to_string()),
    ]
}

fn render_table(trees: &[TreeRecord], quiet: bool) {
    let rows: Vec<[String; 5]> = trees.iter().map(row).collect();

    if quiet {
        for row in rows {
            println!("{}", row.join("\t"));
        }
        return;
    }

    if rows.is_empty() {
        println!("{}", "No trees found.".dim());
        return;
    }

    let widths: Vec<usize> = HEADERS
        .iter()
        .enumerate()
        .map(|(idx, header)| {
            rows.iter()
                .map(|row| row[idx].chars().count())
                .max()
                .unwrap_or(0)
                .max(header.len())
        })
        .collect();

    for (header, width) in HEADERS.iter().zip(&widths) {
        print!("{header:<width$}  ");
    }
    println!();
    for width in &widths {
        print!("{:-<width$}  ", "");
    }
    println!();

    for row in rows {
        for (value, width) in row.iter().zip(&widths) {
            print!("{value:<width$}  ");
        }
        println!();
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use kinship::TreeId;

    use super::*;

    fn tree(id: &str, title: Option<&str>) -> TreeRecord {
        TreeRecord {
            title: title.map(str::to_string),
            ..TreeRecord::new(TreeId::new(id))
        }
    }

    #[test]
    fn filter_matches_titles_case_insensitively() {
        let trees = vec![
            tree("1", Some("The Byron Line")),
            tree("2", Some("Lovelace")),
            tree("3", None),
        ];

        let kept = filter(trees, Some("^the byron")).unwrap();

        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, TreeId::new("1"));
    }

    #[test]
    fn no_pattern_keeps_everything() {
        let trees = vec![tree("1", None), tree("2", Some("Kin"))];
        assert_eq!(filter(trees, None).unwrap().len(), 2);
    }

    #[test]
    fn invalid_pattern_is_an_error() {
        assert!(filter(vec![], Some("(")).is_err());
    }

    #[tokio::test]
    async fn public_listing_skips_own_trees() {
        let (config, server) =
            crate::cli::canned::respond("200 OK", r#"[{"id": 3, "title": "Kin"}]"#).await;
        let list = List {
            public: true,
            matching: Some("kin".to_string()),
            output: OutputFormat::Json,
            quiet: false,
        };

        list.run(&config).await.unwrap();

        assert!(server.await.unwrap().starts_with("GET /trees/public "));
    }

    #[test]
    fn row_fills_missing_fields() {
        let mut record = tree("7", None);
        assert_eq!(row(&record), ["7", "(untitled)", "-", "-", "-"].map(String::from));

        record.is_public = Some(true);
        record.owner = Some("ada".to_string());
        record.created_at = Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap());
        assert_eq!(row(&record), ["7", "(untitled)", "public", "ada", "2024-03-01"].map(String::from));
    }
}
