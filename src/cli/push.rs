use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use kinship::{Config, TreeForm, TreeId, TreeRecord, TreeScope, builder::SaveOutcome};
use tracing::instrument;

use super::terminal::Colorize;

#[derive(Debug, Parser)]
#[command(about = "Create or update a tree from a GEDCOM file")]
pub struct Push {
    /// The GEDCOM file to upload
    file: PathBuf,

    /// Title of the tree
    #[arg(long)]
    title: String,

    /// Replace the file of this tree instead of creating a new one
    #[arg(long, value_name = "ID")]
    id: Option<String>,

    /// Free-text description
    #[arg(long, default_value = "")]
    description: String,

    /// Archive the tree was transcribed from
    #[arg(long = "archive", default_value = "")]
    archive_source: String,

    /// Reference code within the archive
    #[arg(long, default_value = "")]
    document_code: String,

    /// List the tree publicly
    #[arg(long)]
    public: bool,
}

impl Push {
    fn form(&self) -> TreeForm {
        TreeForm {
            title: self.title.clone(),
            description: self.description.clone(),
            archive_source: self.archive_source.clone(),
            document_code: self.document_code.clone(),
            is_public: self.public,
        }
    }

    #[instrument(level = "debug", skip(self, config), fields(file = %self.file.display()))]
    pub async fn run(self, config: &Config) -> anyhow::Result<()> {
        let text = std::fs::read_to_string(&self.file)
            .with_context(|| format!("failed to read {}", self.file.display()))?;

        let mut session = super::session(config)?;

        if let Some(id) = &self.id {
            // the stored file is replaced wholesale, so skip downloading it
            let record = TreeRecord {
                has_gedcom: Some(false),
                ..TreeRecord::new(TreeId::new(id.as_str()))
            };
            session.open(record, TreeScope::Own, false).await?;
        }

        for warning in session.builder_mut().import_gedcom(&text)? {
            tracing::warn!("{warning}");
        }

        match session.save(&self.form()).await? {
            SaveOutcome::Saved(record) => {
                let verb = if self.id.is_some() { "Updated" } else { "Created" };
                println!(
                    "{}",
                    format!("{verb} tree {} ({} people)", record.id, session.builder().people().len())
                        .success()
                );
                Ok(())
            }
            other => anyhow::bail!("save did not complete: {other:?}"),
        }
    }
}
