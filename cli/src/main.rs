use anyhow::{Context, Result};
use tracing::error;
use tracing_subscriber::EnvFilter;

use agent_core::{Agent, AgentConfig, Message, Role};
use agent_tools::load_tools;

/// Shown when the agent's final message has no text.
const NO_REPLY: &str = "(no response)";

/// Turns of the remembered conversation. The later questions only make sense
/// if the earlier ones are still in the history.
const CONVERSATION: [&str; 4] = [
    "My name is Taro Yamada.",
    "What time is it in Tokyo right now?",
    "Do you remember my name?",
    "How many minutes have passed since the time you told me earlier?",
];

const SINGLE_QUESTIONS: [&str; 3] = [
    "What's the weather in Tokyo?",
    "What time is it now?",
    "Hello!",
];

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_target(false)
        .compact()
        .init();

    if let Err(e) = run().await {
        error!("Chatbot failed: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config = AgentConfig::from_env().context("invalid agent configuration")?;
    let tools = load_tools(&config).await.context("failed to load tools")?;
    let agent = Agent::new(&config, tools);

    conversation(&agent).await?;
    single_questions(&agent).await
}

/// Chat with the history carried across turns.
async fn conversation(agent: &Agent) -> Result<()> {
    let mut history: Vec<Message> = Vec::new();

    println!("=== Chatbot (with history) ===\n");

    for question in CONVERSATION {
        println!("You: {}", question);
        history.push(Message::human(question));

        let reply = agent.invoke_with_messages(&history).await?;
        let text = reply_text(&reply);
        println!("AI:  {}\n", text);

        history.push(Message::assistant(text));
    }

    println!("=== History ===");
    for (index, message) in history.iter().enumerate() {
        let who = match message.role() {
            Role::Human => "You",
            _ => "AI ",
        };
        println!("{}. {} {}", index + 1, who, message.text().unwrap_or_default());
    }
    Ok(())
}

/// One-off questions, no shared history.
async fn single_questions(agent: &Agent) -> Result<()> {
    println!("\n=== Single questions ===\n");

    for question in SINGLE_QUESTIONS {
        println!("You: {}", question);
        let reply = agent.invoke(question).await?;
        println!("AI:  {}\n", reply_text(&reply));
    }
    Ok(())
}

fn reply_text(reply: &Message) -> String {
    reply
        .text()
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| NO_REPLY.to_string())
}
