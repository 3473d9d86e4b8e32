//! Terminal walkthrough of the four practice stages.
//!
//! Run against a local backend with:
//! ```bash
//! export PRACTICE_API_URL="http://localhost:8000"
//! cargo run --example practice
//! ```
//!
//! Stage 2 and 3 commands: type a message to send it, `/done` to finish the
//! stage. After each stage 2 reply, enter a mood score from 0 to 100.

use empathy_practice::options::{StreamOptions, UpdateMode};
use empathy_practice::{ChatMessage, PracticeFlow, SessionClient, SessionStage};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

fn render(messages: &[ChatMessage]) {
    if let Some(last) = messages.last() {
        print!("\r\x1b[2KAI: {}", last.content);
        let _ = std::io::stdout().flush();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let client = SessionClient::from_env()?;
    let options = StreamOptions::default().with_update(UpdateMode::coalesced());
    let mut flow = PracticeFlow::with_stream_options(client, options);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("Anything bothering you lately? Tell me, and let's start practicing.");

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let outcome = match flow.stage() {
            SessionStage::Input => flow.submit_issue(line).await.map(|_| {
                println!("(stage 2: I'm listening. /done when you feel ready)");
            }),
            SessionStage::Conversation if flow.awaiting_rating() => match line.parse::<u8>() {
                Ok(value) => flow.rate_mood(value).await,
                Err(_) => {
                    println!("Mood is a number from 0 (awful) to 100 (great).");
                    continue;
                }
            },
            SessionStage::Conversation if line == "/done" => {
                println!("(stage 3: now it's your turn to comfort me. /done to review)");
                flow.complete_stage2(render).await.map(|_| println!())
            }
            SessionStage::Conversation => flow.send_stage2(line, render).await.map(|_| {
                println!();
                println!("How do you feel now? (0-100)");
            }),
            SessionStage::RoleSwap if line == "/done" => flow.complete_stage3().await.map(|_| {
                for (index, message) in flow.stage3_messages().iter().enumerate() {
                    println!("{:?}: {}", message.role, message.content);
                    if let Some(note) = flow.annotation_for(index) {
                        println!("    -> {}", note);
                    }
                }
                println!("(type anything to start a new practice)");
            }),
            SessionStage::RoleSwap => flow.send_stage3(line, render).await.map(|_| println!()),
            SessionStage::Review | SessionStage::Terminated => {
                flow.restart();
                println!("Anything bothering you lately?");
                Ok(())
            }
        };

        if let Err(e) = outcome {
            println!();
            eprintln!("Error: {}", e);
        }
    }

    Ok(())
}
