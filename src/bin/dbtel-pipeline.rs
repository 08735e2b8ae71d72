use anyhow::Result;
use dbtel_pipeline::cli::{actions, start};

#[tokio::main]
async fn main() -> Result<()> {
    let action = start()?;
    actions::run::handle(action).await
}
