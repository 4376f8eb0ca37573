use anyhow::Result;
use clap::{Parser, Subcommand};
use ragdesk::commands::{
    ask_question, delete_collection, ingest_source, list_collections, load_config, run_chat,
    run_telegram, show_status,
};
use ragdesk::config::{get_config_dir, run_interactive_config, show_config};

#[derive(Parser)]
#[command(name = "ragdesk")]
#[command(about = "Knowledge-base question answering over your documents, with a Telegram bot")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure the model provider, storage and Telegram settings
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Load a PDF, text file or URL into a collection
    Ingest {
        /// Path to a PDF or text file, or an http(s) URL
        source: String,
        /// Collection to index the document into
        #[arg(long)]
        collection: String,
    },
    /// Ask a single question against a collection
    Ask {
        collection: String,
        question: String,
        /// Conversation session to continue
        #[arg(long)]
        session: Option<String>,
    },
    /// Chat interactively with a collection
    Chat { collection: String },
    /// List collections
    List,
    /// Delete a collection and its document records
    Delete { collection: String },
    /// Answer Telegram messages until interrupted
    Telegram,
    /// Show the state of storage, credentials and indexed documents
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config { show } => {
            let config_dir = get_config_dir()?;
            if show {
                show_config(&config_dir)?;
            } else {
                run_interactive_config(&config_dir)?;
            }
        }
        Commands::Ingest { source, collection } => {
            ingest_source(&load_config()?, &source, &collection).await?;
        }
        Commands::Ask {
            collection,
            question,
            session,
        } => {
            ask_question(&load_config()?, &collection, &question, session.as_deref()).await?;
        }
        Commands::Chat { collection } => {
            run_chat(&load_config()?, &collection).await?;
        }
        Commands::List => {
            list_collections(&load_config()?).await?;
        }
        Commands::Delete { collection } => {
            delete_collection(&load_config()?, &collection).await?;
        }
        Commands::Telegram => {
            run_telegram(&load_config()?).await?;
        }
        Commands::Status => {
            show_status(&load_config()?).await?;
        }
    }

    Ok(())
}
