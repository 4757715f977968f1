mod cli;

pub use cli::Cli;
use cli::Commands;

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        match &self.command {
            Commands::Role(role) => self.run_role(role).await?,
            Commands::Up(up) => self.run_up(up).await?,
            Commands::Status => self.run_status().await?,
            Commands::Down(down) => self.run_down(down).await?,
        }

        Ok(())
    }
}
