use clap::Parser;
use iot_router::cli::{commands, Cli, Commands};
use iot_router::native::init_tracing;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(args) => {
            init_tracing(args.json_logs);
            commands::execute_serve(args).await?
        }
        Commands::CheckConfig(args) => commands::execute_check_config(args)?,
    }

    Ok(())
}
