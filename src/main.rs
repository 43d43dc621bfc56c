use clap::Parser;
use color_eyre::Result;
use smarttask::{
    Config, Profile,
    cli::{self, Cli, Commands, Context},
    utils::expand_path,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Set up error reporting with color-eyre
    color_eyre::install()?;

    // Logs go to stderr so they never mix with command output
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    // Determine profile: --dev flag enables dev mode, otherwise use prod
    let profile = if cli.dev { Profile::Dev } else { Profile::Prod };

    let config = match &cli.config {
        Some(path) => Config::load_from_path(&expand_path(path))?,
        None => Config::load_with_profile(profile)?,
    };
    tracing::debug!(database = %config.get_database_path().display(), "configuration loaded");

    let ctx = Context::open(config)?;

    match cli.command {
        Commands::Register { email, password, confirm } => {
            cli::handle_register(&ctx, email, password, confirm).await?
        }
        Commands::Login { email, password, resend_verification } => {
            cli::handle_login(&ctx, email, password, resend_verification).await?
        }
        Commands::Logout => cli::handle_logout(&ctx).await?,
        Commands::Whoami => cli::handle_whoami(&ctx).await?,
        Commands::ResetPassword { email } => cli::handle_reset_password(&ctx, email).await?,
        Commands::Add { title, due } => cli::handle_add(&ctx, title, due).await?,
        Commands::List => cli::handle_list(&ctx).await?,
        Commands::Toggle { id } => cli::handle_toggle(&ctx, id).await?,
        Commands::Edit { id, title, due } => cli::handle_edit(&ctx, id, title, due).await?,
        Commands::Delete { id } => cli::handle_delete(&ctx, id).await?,
        Commands::Calendar { date } => cli::handle_calendar(&ctx, date).await?,
        Commands::Dashboard => cli::handle_dashboard(&ctx).await?,
        Commands::Watch => cli::handle_watch(&ctx).await?,
    }

    Ok(())
}
