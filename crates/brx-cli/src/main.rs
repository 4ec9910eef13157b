//! 🚀 brx-cli — the front door, the bouncer, the maitre d' of brx.
//!
//! 🎬 *[narrator voice]* "It all started with a simple main() function..."
//! 📦 This binary crate is the thin CLI wrapper that loads config,
//! sets up logging, and then lets the real code do the heavy lifting.
//! Like a manager. 🦆

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use brx::RunMode;

/// 🪣 Replicate one bucket into another through a stream.
#[derive(Debug, Parser)]
#[command(name = "brx", version, about)]
struct Cli {
    /// 🔧 TOML config file. Missing file = env vars (BRX_*) only.
    #[arg(long, short, global = true, default_value = "brx.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// 🔭 List the source bucket onto the stream, then exit.
    Scan,
    /// 🧑‍🏭 Consume the stream and copy objects until the final marker.
    Replicate,
    /// 🎪 Scan and replicate in one process.
    Run,
}

impl From<Command> for RunMode {
    fn from(command: Command) -> Self {
        match command {
            Command::Scan => RunMode::Scan,
            Command::Replicate => RunMode::Replicate,
            Command::Run => RunMode::All,
        }
    }
}

/// 🚀 main() — where it all begins. The genesis. The big bang.
/// The "I pressed F5 and held my breath" moment.
#[tokio::main]
async fn main() -> Result<()> {
    // 📡 Set up tracing — because println! debugging is a lifestyle choice
    // we're trying to move past, like flip phones and cargo shorts
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    // 🔒 Validate the config file exists before we get too emotionally attached
    let the_config_file = match cli.config.try_exists().context(format!(
        "💀 Couldn't check whether the config file exists. Was checking here: '{}'. \
         If that's a relative path, try an absolute one.",
        cli.config.display()
    ))? {
        true => Some(cli.config.as_path()),
        false => None,
    };

    let app_config = brx::app_config::load_config(the_config_file)
        .context("💀 In brx-cli, main, we couldn't load the config. Take a look at the file and the BRX_* env vars.")?;

    let result = brx::run(app_config, cli.command.into()).await;

    if let Err(err) = result {
        error!("💀 error: {}", err);
        // -- 🧅 peel the onion of sadness, one tear-jerking layer at a time
        let mut the_vibes_are_giving_credential_issues = false;
        for cause in err.chain().skip(1) {
            error!("⚠️  cause: {}", cause);
            let cause_str = cause.to_string();
            if cause_str.contains("NoCredentialsError")
                || cause_str.contains("ExpiredToken")
                || cause_str.contains("InvalidAccessKeyId")
                || cause_str.contains("failed to load credentials")
            {
                the_vibes_are_giving_credential_issues = true;
            }
        }

        if the_vibes_are_giving_credential_issues {
            error!(
                "🔧 hint: looks like AWS didn't like our credentials. \
                Check AWS_PROFILE / AWS_ACCESS_KEY_ID, or run `aws sts get-caller-identity` \
                to see who you are today. ☕"
            );
        }

        // 🗑️ Exit with prejudice. Process exitus maximus.
        std::process::exit(1);
    }

    Ok(())
}
