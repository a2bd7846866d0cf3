use beach_panes::terminal::{self, Cli};
use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    terminal::run(cli).await?;
    Ok(())
}
