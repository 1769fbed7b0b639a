use std::env;
use std::path::Path;

use anyhow::{bail, Context, Result};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use mcq_flashcards::app::build_quiz;
use mcq_flashcards::{user_message, App, CardId, CardStore, Config, FlashcardMcq, QuizFilter, SqliteStorage};

const USAGE: &str = "\
Usage: mcq-flashcards <command>

Commands:
  import <file.pdf> [--source NAME]   Extract questions from a PDF
  generate <topic> [option-count]     Generate one question about a topic
  list [source]                       List cards
  sources                             List import sources
  delete <card-id>                    Delete a card
  delete-source <name>                Delete every card from a source
  quiz [source]                       Print a shuffled quiz and its answer key";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let config = Config::load();

    match args.first().map(String::as_str) {
        Some("import") => {
            let Some(path) = args.get(1) else { bail!(USAGE) };
            let source = flag_value(&args, "--source").unwrap_or_else(|| file_name(path));
            import(config, Path::new(path), &source).await
        }
        Some("generate") => {
            let Some(topic) = args.get(1) else { bail!(USAGE) };
            let option_count: usize = match args.get(2) {
                Some(n) => n.parse().context("option count must be a number")?,
                None => 4,
            };
            generate(config, topic, option_count).await
        }
        Some("list") => {
            let store = open_store(&config)?;
            let cards: Vec<&FlashcardMcq> = match args.get(1) {
                Some(source) => store.cards_for_source(source),
                None => store.cards().iter().collect(),
            };
            for card in cards {
                print_card(card, true);
            }
            Ok(())
        }
        Some("sources") => {
            let store = open_store(&config)?;
            for name in store.source_names() {
                println!("{name} ({})", store.cards_for_source(name).len());
            }
            Ok(())
        }
        Some("delete") => {
            let Some(id) = args.get(1) else { bail!(USAGE) };
            let id: CardId = id.parse().context("invalid card id")?;
            let mut store = open_store(&config)?;
            if store.delete(id) == 0 {
                eprintln!("No card with id {id}");
            }
            Ok(())
        }
        Some("delete-source") => {
            let Some(name) = args.get(1) else { bail!(USAGE) };
            let mut store = open_store(&config)?;
            println!("Deleted {} cards", store.delete_source(name));
            Ok(())
        }
        Some("quiz") => {
            let store = open_store(&config)?;
            let filter = match args.get(1) {
                Some(source) => QuizFilter::Source(source.clone()),
                None => QuizFilter::All,
            };
            let session = build_quiz(&store, &filter, &config.quiz);
            for (i, card) in session.cards().iter().enumerate() {
                print!("{}/{} ", i + 1, session.total());
                print_card(card, false);
            }
            println!("\nAnswers:");
            for (i, card) in session.cards().iter().enumerate() {
                if let Some(pos) = card.options.iter().position(|o| card.is_correct(o.id)) {
                    println!("  {}. {}", i + 1, option_letter(pos));
                }
            }
            Ok(())
        }
        _ => {
            println!("{USAGE}");
            Ok(())
        }
    }
}

async fn import(config: Config, path: &Path, source: &str) -> Result<()> {
    let document = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let mut app = App::new(config)?;

    let slot = app.import_slot();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            slot.cancel();
        }
    });

    match app.import_document(&document, source).await {
        Ok(summary) if summary.imported == 0 => {
            println!("No questions found in {}", path.display());
            Ok(())
        }
        Ok(summary) => {
            println!("Imported {} cards from {source}", summary.imported);
            if summary.skipped > 0 {
                println!("Skipped {} malformed questions", summary.skipped);
            }
            Ok(())
        }
        Err(e) => bail!(user_message(&e)),
    }
}

async fn generate(config: Config, topic: &str, option_count: usize) -> Result<()> {
    let mut app = App::new(config)?;
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    match app.generate_card(topic, option_count, &cancel).await {
        Ok(card) => {
            print_card(&card, true);
            Ok(())
        }
        Err(e) => bail!(user_message(&e)),
    }
}

fn open_store(config: &Config) -> Result<CardStore<SqliteStorage>> {
    Ok(CardStore::open(SqliteStorage::open(&config.db_path())?))
}

fn print_card(card: &FlashcardMcq, show_answer: bool) {
    println!("[{}] {}", card.id, card.question);
    for (i, option) in card.options.iter().enumerate() {
        let marker = if show_answer && card.is_correct(option.id) { '*' } else { ' ' };
        println!("  {marker} {}. {}", option_letter(i), option.text);
    }
    if let Some(topic) = &card.topic {
        println!("    topic: {topic}");
    }
    if let Some(source) = &card.source_name {
        println!("    source: {source}");
    }
    if show_answer {
        if let Some(explanation) = &card.explanation {
            println!("    {explanation}");
        }
    }
}

fn option_letter(index: usize) -> char {
    (b'A' + (index % 26) as u8) as char
}

fn flag_value(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn file_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}
