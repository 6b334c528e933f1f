//! `pagewise ask`: answer one question and print its sources.

use super::runtime::{load_config, parse_variant, session_factory};
use std::path::Path;

pub async fn run(explicit: Option<&Path>, message: &str, variant: Option<String>) -> anyhow::Result<()> {
    let config = load_config(explicit)?;
    let factory = session_factory(&config).await?;
    let variant = parse_variant(variant.as_deref(), &factory)?;
    let mut session = factory.create_with_variant(variant)?;

    eprint!("  Thinking...");
    let reply = session.send_message(message).await?;
    eprint!("\r              \r");

    println!("{}", reply.content);
    if let Some(entry) = reply.sources_index.and_then(|i| session.sources_entry(i)) {
        println!("{}", entry.render());
    }

    Ok(())
}
