//! Interactive fiction REPL.
//!
//! A plain-text terminal front end over `tale-core`. Line-oriented:
//! - Lines starting with `#` are commands (new, list, load, delete, status, quit)
//! - Everything else is a player action

use std::io::{self, BufRead};
use tale_core::{SessionId, StoryConfig, StoryEngine, TurnReport};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }

    let mut config = StoryConfig::from_env();
    if let Some(i) = args.iter().position(|a| a == "--data") {
        if let Some(path) = args.get(i + 1) {
            config = config.with_data_path(path);
        } else {
            eprintln!("Error: --data requires a path");
            std::process::exit(1);
        }
    }

    let mut engine = StoryEngine::from_config(config).await?;

    if args.iter().any(|a| a == "--status") {
        print_status(&engine).await;
        return Ok(());
    }

    println!("=== Tales from Vessmer ===");
    print_status(&engine).await;
    print_stories(&engine).await;
    println!();
    println!("Commands:");
    println!("  #new        - Begin a new story");
    println!("  #list       - List saved stories");
    println!("  #load <n>   - Resume story n from the list");
    println!("  #delete <n> - Delete story n from the list");
    println!("  #status     - Show backend availability");
    println!("  #quit       - Save and exit");
    println!();
    println!("Anything else is what you do next.");
    println!();

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                eprintln!("Error reading input: {e}");
                break;
            }
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix('#') {
            let parts: Vec<&str> = rest.split_whitespace().collect();
            match parts.first().copied() {
                Some("quit") | Some("exit") => {
                    if let Err(e) = engine.save().await {
                        eprintln!("[ERROR] Save failed: {e}");
                    }
                    println!("The tide keeps what you told it. Farewell.");
                    break;
                }
                Some("new") => match engine.begin_story().await {
                    Ok(report) => print_turn(&mut engine, report).await,
                    Err(e) => println!("[ERROR] Could not begin: {e}"),
                },
                Some("list") => print_stories(&engine).await,
                Some("load") => match parse_index(parts.get(1)) {
                    Some(index) => match story_at(&engine, index).await {
                        Some(id) => match engine.resume_story(id).await {
                            Ok(()) => print_transcript_tail(&engine).await,
                            Err(e) => println!("[ERROR] Load failed: {e}"),
                        },
                        None => println!("[ERROR] No story numbered {index}"),
                    },
                    None => println!("[ERROR] Usage: #load <n>"),
                },
                Some("delete") => match parse_index(parts.get(1)) {
                    Some(index) => match story_at(&engine, index).await {
                        Some(id) => {
                            engine.delete_story(id).await;
                            println!("[DELETED] Story {index}");
                        }
                        None => println!("[ERROR] No story numbered {index}"),
                    },
                    None => println!("[ERROR] Usage: #delete <n>"),
                },
                Some("status") => print_status(&engine).await,
                Some("help") => print_help(),
                _ => println!("[ERROR] Unknown command: #{rest}"),
            }
            continue;
        }

        // A plain line is a player action.
        match engine.lock_action(line).await {
            Ok(()) => {
                let report = engine.resolve_roll().await;
                match report {
                    Ok(report) => print_turn(&mut engine, report).await,
                    Err(e) => println!("[ERROR] {e}"),
                }
            }
            Err(e) => println!("[ERROR] {e}"),
        }
    }

    Ok(())
}

/// Print a finished turn, chasing any model-demanded rolls to completion.
async fn print_turn(engine: &mut StoryEngine, mut report: TurnReport) {
    loop {
        if let Some(roll) = report.roll {
            println!("  (the die lands on {roll})");
            println!();
        }

        println!("{}", report.text);
        print_notices(engine, &report).await;

        if let Some(source) = &report.llm_source {
            println!();
            println!("  [narrated by: {source}]");
        }

        let Some(reason) = report.roll_demand.clone() else {
            break;
        };

        println!();
        println!("  The outcome hangs on: {reason}");
        report = match engine.resolve_roll().await {
            Ok(next) => next,
            Err(e) => {
                println!("[ERROR] {e}");
                break;
            }
        };
    }
    println!();
}

/// Print system notices (items, spells) synthesized after the narration.
async fn print_notices(engine: &StoryEngine, report: &TurnReport) {
    let store = engine.store();
    let store = store.lock().await;
    let Some(session) = store.session(report.session) else {
        return;
    };

    // Notices, if any, follow the narration message.
    let after_narration = session
        .messages
        .iter()
        .skip_while(|m| m.id != report.narration)
        .skip(1);
    for message in after_narration {
        if message.role == tale_core::Role::System && message.roll.is_none() {
            println!("  * {}", message.content);
        }
    }
}

async fn print_status(engine: &StoryEngine) {
    let status = engine.orchestrator().status().await;
    if status.backends.is_empty() {
        println!("No narrators configured.");
        return;
    }
    for backend in &status.backends {
        let mark = if backend.available { "ready" } else { "offline" };
        println!("  {} - {}", backend.label, mark);
    }
    match &status.active {
        Some(active) => println!("  Active narrator: {active}"),
        None => println!("  No narrator available. Start Ollama or set HOSTED_API_URL."),
    }
}

async fn print_stories(engine: &StoryEngine) {
    let store = engine.store();
    let store = store.lock().await;
    let sessions = store.sessions();
    if sessions.is_empty() {
        println!("No saved stories yet. #new begins one.");
        return;
    }
    println!("Saved stories:");
    for (i, session) in sessions.iter().enumerate() {
        println!(
            "  {}. {} ({} messages)",
            i + 1,
            session.title,
            session.messages.len()
        );
    }
}

/// Show the last few exchanges when resuming a story.
async fn print_transcript_tail(engine: &StoryEngine) {
    let store = engine.store();
    let store = store.lock().await;
    let Some(id) = store.active_id() else {
        return;
    };
    let Some(session) = store.session(id) else {
        return;
    };

    println!("[RESUMED] {}", session.title);
    let tail = session.messages.iter().rev().take(4).collect::<Vec<_>>();
    for message in tail.into_iter().rev() {
        match message.role {
            tale_core::Role::Narrator => println!("\n{}", message.content),
            tale_core::Role::Player => println!("\n> {}", message.content),
            tale_core::Role::System => println!("  * {}", message.content),
        }
    }
    println!();
}

async fn story_at(engine: &StoryEngine, index: usize) -> Option<SessionId> {
    let store = engine.store();
    let store = store.lock().await;
    store.sessions().get(index.checked_sub(1)?).map(|s| s.id)
}

fn parse_index(arg: Option<&&str>) -> Option<usize> {
    arg.and_then(|a| a.parse().ok())
}

fn print_help() {
    println!("tale - interactive fiction with LLM narration");
    println!();
    println!("Usage: tale [--data <path>] [--status]");
    println!();
    println!("  --data <path>  Where to persist stories (default: TALE_DATA_FILE)");
    println!("  --status       Probe narrators and exit");
    println!();
    println!("Environment:");
    println!("  LOCAL_LLM_URL     Ollama URL (default http://localhost:11434)");
    println!("  LOCAL_LLM_MODEL   Ollama model (default llama3.2)");
    println!("  PREFER_LOCAL_LLM  Set to 'false' to prefer a resident engine");
    println!("  HOSTED_API_URL    Remote hosted fallback endpoint");
    println!("  PLAYER_IDENTITY   Persistent identity woven into the story");
    println!("  TALE_DATA_FILE    Default persistence path");
}
