mod config;
mod server;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use letterbox_mail::login::hash_password;

use config::read_config;
use server::Server;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(subcommand)]
    command: Command,

    /// A special mode dedicated to developers, NOT INTENDED FOR PRODUCTION
    #[clap(long)]
    dev: bool,

    #[clap(
        short,
        long,
        env = "LETTERBOX_CONFIG",
        default_value = "letterbox.toml"
    )]
    /// Path to the main Letterbox configuration file
    config_file: PathBuf,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Runs the IMAP server
    Daemon,

    #[clap(subcommand)]
    /// Specific tooling, should not be part of a normal workflow
    Tools(ToolsCommand),
}

#[derive(Subcommand, Debug)]
enum ToolsCommand {
    /// Hash a password for the `users` section of the configuration file
    PasswordHash {
        #[clap(env = "LETTERBOX_PASSWORD")]
        maybe_password: Option<String>,
    },
}

fn tracer() {
    tracing_subscriber::fmt::init();
}

#[tokio::main]
async fn main() -> Result<()> {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var(
            "RUST_LOG",
            "letterbox=info,letterbox_proto=info,letterbox_mail=info",
        )
    }

    // Abort on panic
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("{}", panic_info);
        eprintln!("{:?}", backtrace::Backtrace::new());
        std::process::abort();
    }));

    tracer();

    let args = Args::parse();
    match &args.command {
        Command::Daemon => {
            let server = if args.dev {
                Server::dev().await?
            } else {
                let config = read_config(args.config_file.clone()).with_context(|| {
                    format!("unable to read configuration {:?}", args.config_file)
                })?;
                Server::from_config(config).await?
            };
            server.run().await?;
        }
        Command::Tools(ToolsCommand::PasswordHash { maybe_password }) => {
            let password = match maybe_password {
                Some(pwd) => pwd.clone(),
                None => rpassword::prompt_password("Enter password: ")?,
            };
            println!("{}", hash_password(&password)?);
        }
    }

    Ok(())
}
