use clap::Parser;
use kinship::{Config, TreeId};
use tracing::instrument;

#[derive(Debug, Parser)]
#[command(about = "Delete a tree")]
pub struct Delete {
    /// Id of the tree
    id: String,
}

impl Delete {
    #[instrument(level = "debug", skip(config))]
    pub async fn run(self, config: &Config) -> anyhow::Result<()> {
        let mut session = super::session(config)?;
        let id = TreeId::new(self.id);

        session.delete(&id).await?;
        println!("Deleted tree {id}");

        Ok(())
    }
}
