//! Headless BhootAI session on stdin/stdout.
//!
//! Reads configuration from the environment (and `.env`), prints the
//! opening scene and welcome, then narrates each line typed.
//! Type `status` for plot progress, `quit` to leave, `reset` to leave and
//! purge the saved game.
//!
//! Run with: `cargo run -p bhoot-core --example headless_session`

use bhoot_core::{GameSession, SessionConfig};
use tokio::io::{self, AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn,bhoot_core=info")),
        )
        .init();

    let config = SessionConfig::from_env()?;
    let mut session = GameSession::start(config).await?;
    println!("Loaded {} lore chunks.\n", session.lore_chunks());

    match session.opening_scene().await {
        Ok(scene) => println!("{scene}\n"),
        Err(e) => eprintln!("(no opening scene: {e})\n"),
    }
    println!("{}\n", session.welcome().await);

    let mut lines = BufReader::new(io::stdin()).lines();
    let mut purge = false;
    while let Some(line) = lines.next_line().await? {
        let input = line.trim();
        match input {
            "" => continue,
            "quit" => break,
            "reset" => {
                purge = true;
                break;
            }
            "status" => {
                println!("{}\n", session.plot_summary());
                continue;
            }
            _ => {}
        }

        match session.player_action(input).await {
            Ok(response) => {
                println!("{}\n", response.text);
                if let Some(warning) = response.warning {
                    eprintln!("[warning] {warning}\n");
                }
            }
            Err(e) => eprintln!("The spirits are silent ({e}). Try again.\n"),
        }
    }

    session.end(purge).await?;
    Ok(())
}
