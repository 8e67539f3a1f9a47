use clap::Parser;

use release_automaton::{
    Result,
    cli::{Args, Command},
    command,
};

fn initialize_logger(debug: bool) -> Result<()> {
    let filter = if debug {
        simplelog::LevelFilter::Debug
    } else {
        simplelog::LevelFilter::Info
    };

    let config = simplelog::ConfigBuilder::new()
        .add_filter_allow_str("release_automaton")
        .build();

    simplelog::TermLogger::init(
        filter,
        config,
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )?;

    Ok(())
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let cli_args = Args::parse();

    initialize_logger(cli_args.debug)?;

    match &cli_args.command {
        Command::Run(run) => {
            command::run::execute(&cli_args, run).await?;
        }
        Command::ListVersions { release_file } => {
            command::list_versions::execute(release_file).await?;
        }
        Command::UpdateVars(vars) => command::update_vars::execute(vars)?,
    }

    Ok(())
}
