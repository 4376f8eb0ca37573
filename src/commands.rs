use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::channels::telegram::{TelegramChannel, TelegramClient};
use crate::channels::{QueryHandler, reply_text};
use crate::config::{Config, get_config_dir};
use crate::database::Database;
use crate::database::open_vector_index;
use crate::loader::DocumentSource;
use crate::pipeline::{QueryRequest, QueryResponse, RagService};

/// Session used by `ask` when none is given on the command line
pub const CLI_SESSION: &str = "cli";

/// Load `config.toml` from the ragdesk home directory, falling back to defaults
#[inline]
pub fn load_config() -> Result<Config> {
    let config_dir = get_config_dir()?;
    Config::load(&config_dir).context("Failed to load configuration")
}

async fn build_service(config: &Config) -> Result<RagService> {
    RagService::from_config(config)
        .await
        .context("Failed to initialize the RAG service")
}

fn print_response(response: &QueryResponse) {
    println!("{}", reply_text(response));

    if !response.citations.is_empty() {
        println!();
        println!("Sources:");
        for citation in &response.citations {
            println!(
                "  • {} (page {}, score {:.3})",
                citation.source, citation.page, citation.similarity_score
            );
        }
    }
}

/// Load a PDF, text file or URL into `collection`
#[inline]
pub async fn ingest_source(config: &Config, input: &str, collection: &str) -> Result<()> {
    let source = DocumentSource::detect(input)?;
    let service = build_service(config).await?;

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner} {msg}")?);
    spinner.set_message(format!("Indexing {} into {}", source.describe(), collection));
    spinner.enable_steady_tick(Duration::from_millis(120));

    let outcome = service.ingest(&source, collection).await;
    spinner.finish_and_clear();

    let report = outcome.with_context(|| format!("Failed to ingest {}", source.describe()))?;
    println!("✅ Ingested {}", report.source);
    println!("   Collection: {}", report.collection);
    println!("   Document ID: {}", report.document_id);
    println!("   Pages: {}", report.pages);
    println!("   Chunks indexed: {}", report.chunks_indexed);

    Ok(())
}

/// Answer a single question and print it with its sources
#[inline]
pub async fn ask_question(
    config: &Config,
    collection: &str,
    question: &str,
    session: Option<&str>,
) -> Result<()> {
    let service = build_service(config).await?;
    let response = service
        .query(QueryRequest::new(
            collection,
            question,
            session.unwrap_or(CLI_SESSION),
        ))
        .await;

    print_response(&response);
    Ok(())
}

/// What a line typed into the chat loop asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatInput {
    Question(String),
    Reset,
    Quit,
    Empty,
}

#[inline]
pub fn parse_chat_input(line: &str) -> ChatInput {
    match line.trim() {
        "" => ChatInput::Empty,
        "/reset" => ChatInput::Reset,
        "/quit" | "/exit" => ChatInput::Quit,
        question => ChatInput::Question(question.to_string()),
    }
}

/// Interactive question loop against one collection; `/reset` forgets the conversation
#[inline]
pub async fn run_chat(config: &Config, collection: &str) -> Result<()> {
    let service = build_service(config).await?;
    let session = format!("chat-{}", uuid::Uuid::new_v4());

    println!("💬 Chatting with collection '{}'", collection);
    println!("   /reset clears the conversation, /quit or Ctrl-D leaves");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::Write::flush(&mut std::io::stdout()).context("Failed to flush stdout")?;

        let Some(line) = lines.next_line().await.context("Failed to read input")? else {
            println!();
            break;
        };

        match parse_chat_input(&line) {
            ChatInput::Empty => {}
            ChatInput::Quit => break,
            ChatInput::Reset => {
                service.clear_session(&session).await;
                println!("🧹 Conversation cleared");
            }
            ChatInput::Question(question) => {
                let response = service
                    .query(QueryRequest::new(collection, question, session.as_str()))
                    .await;
                print_response(&response);
                println!();
            }
        }
    }

    Ok(())
}

/// List collections with their registry statistics
#[inline]
pub async fn list_collections(config: &Config) -> Result<()> {
    let index = open_vector_index(config)
        .await
        .context("Failed to open vector index")?;
    let collections = index
        .list_collections()
        .await
        .context("Failed to list collections")?;

    if collections.is_empty() {
        println!("No collections have been created yet.");
        println!("Use 'ragdesk ingest <path|url> --collection <name>' to add documents.");
        return Ok(());
    }

    let registry = Database::initialize_from_config_dir(config.get_base_dir())
        .await
        .context("Failed to initialize database")?;
    let summaries = registry.collection_summaries().await?;

    println!("Collections ({} total):", collections.len());
    println!();

    for handle in &collections {
        println!("📚 {}", handle.name);
        println!("   Chunks: {}", handle.len);
        if let Some(dimension) = handle.dimension {
            println!("   Dimension: {}", dimension);
        }

        if let Some(summary) = summaries.iter().find(|s| s.collection == handle.name) {
            println!("   Documents: {}", summary.documents);
            if let Some(last_indexed) = summary.last_indexed {
                println!(
                    "   Last Indexed: {}",
                    last_indexed.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }
        println!();
    }

    Ok(())
}

/// Delete a collection's vectors and registry entries
#[inline]
pub async fn delete_collection(config: &Config, collection: &str) -> Result<()> {
    let index = open_vector_index(config)
        .await
        .context("Failed to open vector index")?;
    let registry = Database::initialize_from_config_dir(config.get_base_dir())
        .await
        .context("Failed to initialize database")?;

    let removed = index
        .delete_collection(collection)
        .await
        .with_context(|| format!("Failed to delete collection {collection}"))?;
    let forgotten = registry.forget_collection(collection).await?;

    if removed || forgotten > 0 {
        println!("✓ Collection '{}' deleted", collection);
        println!("✓ {} document records removed", forgotten);
    } else {
        println!("Collection not found: {}", collection);
    }

    Ok(())
}

/// Run the Telegram adapter until Ctrl-C
#[inline]
pub async fn run_telegram(config: &Config) -> Result<()> {
    let client =
        TelegramClient::new(&config.telegram).context("Failed to create Telegram client")?;
    let service: Arc<dyn QueryHandler> = Arc::new(build_service(config).await?);
    let mut channel = TelegramChannel::new(client, service, config.telegram.clone());

    channel
        .connect()
        .await
        .context("Failed to reach the Telegram Bot API")?;

    println!(
        "🤖 Telegram bot answering from collection '{}'",
        config.telegram.collection
    );
    println!("Press Ctrl+C to stop");

    channel
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Received interrupt signal, shutting down");
        })
        .await?;

    println!("✅ Shutdown complete");
    Ok(())
}

/// Report the state of storage, credentials and indexed documents
#[inline]
pub async fn show_status(config: &Config) -> Result<()> {
    println!("📊 ragdesk Status Report");
    println!("{}", "=".repeat(50));
    println!();

    println!("🗄️  Registry:");
    let database = match Database::initialize_from_config_dir(config.get_base_dir()).await {
        Ok(db) => {
            println!("   ✅ SQLite: {}", config.database_path().display());
            Some(db)
        }
        Err(e) => {
            println!("   ❌ SQLite: Failed to open - {:#}", e);
            None
        }
    };

    println!("🔍 Vector Index:");
    let collections = match open_vector_index(config).await {
        Ok(index) => {
            println!("   ✅ Backend: {}", index.backend_name());
            match index.list_collections().await {
                Ok(collections) => collections,
                Err(e) => {
                    println!("   ❌ Failed to list collections - {}", e);
                    Vec::new()
                }
            }
        }
        Err(e) => {
            println!("   ❌ Failed to open - {}", e);
            Vec::new()
        }
    };

    println!("🤖 Provider:");
    match config.provider.resolve_api_key() {
        Ok(_) => println!("   ✅ API key configured ({})", config.provider.base_url),
        Err(e) => println!("   ❌ {}", e),
    }
    println!("   📋 Chat model: {}", config.provider.chat_model);
    println!("   🔢 Embedding model: {}", config.provider.embedding_model);

    println!("💬 Telegram:");
    match config.telegram.resolve_bot_token() {
        Ok(_) => println!(
            "   ✅ Bot token configured, answering from '{}'",
            config.telegram.collection
        ),
        Err(_) => println!("   💤 No bot token configured"),
    }

    println!();
    println!("📚 Collections:");
    if collections.is_empty() {
        println!("   📭 Nothing indexed yet");
    } else {
        for handle in &collections {
            println!("   • {}: {} chunks", handle.name, handle.len);
        }
    }

    if let Some(database) = database {
        match database.list_documents(None).await {
            Ok(documents) => {
                let completed = documents.iter().filter(|d| d.is_completed()).count();
                let failed = documents.iter().filter(|d| d.is_failed()).count();

                println!();
                println!("📄 Documents:");
                println!("   📊 Total: {}", documents.len());
                println!("   ✅ Completed: {}", completed);
                println!("   ❌ Failed: {}", failed);

                for document in documents.iter().filter(|d| d.is_failed()) {
                    println!(
                        "   ⚠️  {} ({}): {}",
                        document.source,
                        document.collection,
                        document.error_message.as_deref().unwrap_or("unknown error")
                    );
                }
            }
            Err(e) => println!("   ❌ Failed to load documents: {:#}", e),
        }
    }

    println!();
    println!("💡 Next Steps:");
    println!("   • Use 'ragdesk ingest <path|url> --collection <name>' to add documents");
    println!("   • Use 'ragdesk chat <collection>' to try questions interactively");
    println!("   • Use 'ragdesk telegram' to serve the knowledge base to a Telegram bot");

    Ok(())
}
