use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use kinship::{Config, TreeClient, TreeId, TreeRecord, TreeScope, builder::LoadOutcome};
use tracing::instrument;

#[derive(Debug, Parser)]
#[command(about = "Download a tree's GEDCOM file")]
pub struct Pull {
    /// Id of the tree
    id: String,

    /// Fetch through the public listing
    #[arg(long)]
    public: bool,

    /// Keep the file exactly as stored instead of normalizing it
    #[arg(long)]
    raw: bool,

    /// Write here instead of stdout
    #[arg(long, short)]
    output: Option<PathBuf>,
}

impl Pull {
    #[instrument(level = "debug", skip(self, config), fields(id = %self.id))]
    pub async fn run(self, config: &Config) -> anyhow::Result<()> {
        let mut session = super::session(config)?;
        let id = TreeId::new(self.id);
        let scope = if self.public {
            TreeScope::Public
        } else {
            TreeScope::Own
        };

        let text = if self.raw {
            session.client().fetch_gedcom(&id, scope).await?
        } else {
            let outcome = session.open(TreeRecord::new(id.clone()), scope, true).await?;
            if let LoadOutcome::Loaded(warnings) = outcome {
                for warning in &warnings {
                    tracing::warn!("{warning}");
                }
            }
            session.builder().export()?
        };

        match &self.output {
            Some(path) => {
                std::fs::write(path, &text)
                    .with_context(|| format!("failed to write {}", path.display()))?;
                tracing::info!("Wrote tree {id} to {}", path.display());
            }
            None => print!("{text}"),
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::cli::canned;

    const STORED: &str = "0 HEAD\n0 @X9@ INDI\n1 NAME Nour /Haddad/\n0 TRLR\n";

    fn pull(id: &str, raw: bool, output: PathBuf) -> Pull {
        Pull {
            id: id.to_string(),
            public: true,
            raw,
            output: Some(output),
        }
    }

    #[tokio::test]
    async fn raw_pull_writes_the_stored_file() {
        let (config, server) = canned::respond("200 OK", STORED).await;
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("tree.ged");

        pull("12", true, path.clone()).run(&config).await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), STORED);
        assert!(server.await.unwrap().starts_with("GET /trees/public/12/gedcom "));
    }

    #[tokio::test]
    async fn pull_normalizes_through_the_builder() {
        let (config, _server) = canned::respond("200 OK", STORED).await;
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("tree.ged");

        pull("12", false, path.clone()).run(&config).await.unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("1 _UID X9\n"), "{written}");
        assert!(written.contains("1 NAME Nour Haddad\n"), "{written}");
    }

    #[tokio::test]
    async fn missing_tree_is_an_error() {
        let (config, _server) = canned::respond("404 Not Found", "").await;
        let tmp = tempdir().unwrap();

        let result = pull("404", true, tmp.path().join("tree.ged")).run(&config).await;

        assert!(result.is_err());
        assert!(!tmp.path().join("tree.ged").exists());
    }
}
