//! Scores a JSONL file of `{"user_message": .., "bot_response": ..}` lines.
//!
//! Run with: cargo run -p agentlern-reward --example score_jsonl -- <file>
//! Without a file argument the lines are read from stdin.

use agentlern_core::ContextMap;
use agentlern_reward::RewardScorer;
use serde::Deserialize;
use std::error::Error;
use std::fs::File;
use std::io::{self, BufRead, BufReader};

#[derive(Deserialize)]
struct Exchange {
    #[serde(default)]
    user_message: String,
    bot_response: String,
    #[serde(default)]
    context: ContextMap,
}

fn main() -> Result<(), Box<dyn Error>> {
    let path = std::env::args().nth(1);
    let reader: Box<dyn BufRead> = match path {
        Some(p) => Box::new(BufReader::new(File::open(p)?)),
        None => Box::new(BufReader::new(io::stdin())),
    };

    let scorer = RewardScorer::default();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let exchange: Exchange = serde_json::from_str(&line)?;
        let reward = scorer.score(
            &exchange.user_message,
            &exchange.bot_response,
            &exchange.context,
        );

        let shown = if exchange.bot_response.trim().is_empty() {
            "<empty>"
        } else {
            exchange.bot_response.as_str()
        };
        println!("{reward:.2}\t{}", shown.replace('\n', " "));
    }

    Ok(())
}
