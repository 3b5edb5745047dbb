use futures::StreamExt;
use raifbot::{
    client::{history_prompt, parse_response, ApiClient, ChatSession, Mode, Role, DEFAULT_HISTORY_LEVEL},
    llm::http_client,
    Exchange, SourceLookup,
};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::wrappers::LinesStream;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

const ABOUT_APP: &str = "RaifBot recommends fashion products from a Pinterest-sourced catalogue \
and falls back to DuckDuckGo when the catalogue has nothing relevant.";

const TECHNICAL_INFRASTRUCTURE: &str = "Client → /chat (streaming relay) → agent \
(product search over the vector index, web search fallback, chat model) → client → chat history store.";

enum Command {
    Reset,
    Mode(Option<Mode>),
    Quit,
    Ask(String),
}

fn parse_command(line: &str) -> Command {
    let line = line.trim();
    match line.split_once(' ').map_or((line, ""), |(c, rest)| (c, rest.trim())) {
        ("/reset", _) => Command::Reset,
        ("/quit", _) | ("/exit", _) => Command::Quit,
        ("/mode", arg) => Command::Mode(arg.parse().ok().and_then(Mode::from_index)),
        _ => Command::Ask(line.to_string()),
    }
}

fn print_modes() {
    for (i, mode) in Mode::ALL.iter().enumerate() {
        println!("  /mode {}  {}", i + 1, mode);
    }
}

fn show_session(session: &ChatSession) {
    println!("\n=== {} ===", session.mode);
    match session.mode {
        Mode::AboutApp => println!("{}", ABOUT_APP),
        Mode::TechnicalInfrastructure => println!("{}", TECHNICAL_INFRASTRUCTURE),
        Mode::Chatbot => {
            for message in &session.messages {
                let who = match message.role {
                    Role::User => "you",
                    Role::Assistant => "raifbot",
                };
                println!("{}> {}", who, message.content);
            }
        }
    }
}

/// One question: history, prompt, streamed answer, persistence, sources.
async fn ask(api: &ApiClient, session: &mut ChatSession, prompt: String) {
    session.push(Role::User, prompt.clone());

    let history = match api.get_chat_history(&session.session_id).await {
        Ok(history) => history,
        Err(e) => {
            debug!("No usable chat history yet: {}", e);
            Vec::new()
        }
    };
    let prompt_with_history = history_prompt(&prompt, &history, DEFAULT_HISTORY_LEVEL);

    print!("raifbot> ");
    let mut full_response = String::new();
    match api.chat_stream(&prompt_with_history).await {
        Ok(mut tokens) => {
            while let Some(token) = tokens.next().await {
                match token {
                    Ok(token) => {
                        print!("{}", token);
                        let _ = std::io::stdout().flush();
                        full_response.push_str(&token);
                    }
                    Err(e) => {
                        warn!("Stream interrupted: {}", e);
                        break;
                    }
                }
            }
        }
        Err(e) => warn!("Chat request failed: {}", e),
    }
    println!();

    let reply = parse_response(&full_response);
    if reply != full_response {
        println!("\nraifbot> {}", reply);
    }

    if let Err(e) = api
        .save_chat_history(&session.session_id, &[Exchange::new(prompt.clone(), reply.clone())])
        .await
    {
        warn!("Failed to save chat history: {}", e);
    }
    session.push(Role::Assistant, reply);

    match api.get_source(&format!("{}{}", prompt, full_response)).await {
        Ok(SourceLookup::Found(found)) => {
            println!("\nRelated products:");
            for ((name, source), description) in
                found.names.iter().zip(&found.sources).zip(&found.descriptions)
            {
                println!("  • {} ({})", name, source);
                println!("    {}.", description);
            }
        }
        Ok(SourceLookup::NotRetrieved(_)) => {}
        Err(e) => debug!("Source lookup failed: {}", e),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    dotenv::dotenv().ok();
    let endpoint = std::env::var("ENDPOINT").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
    let api = ApiClient::new(http_client(), &endpoint);

    println!("RaifBot chat ({})", api.base_url());
    println!("Commands: /reset, /mode <n>, /quit");
    print_modes();

    let mut session = ChatSession::new(Mode::Chatbot);
    show_session(&session);

    let mut lines = LinesStream::new(BufReader::new(tokio::io::stdin()).lines());
    while let Some(line) = lines.next().await {
        match parse_command(&line?) {
            Command::Quit => break,
            Command::Reset => {
                session.reset();
                show_session(&session);
            }
            Command::Mode(Some(mode)) => {
                session.switch_mode(mode);
                show_session(&session);
            }
            Command::Mode(None) => print_modes(),
            Command::Ask(prompt) if prompt.is_empty() => {}
            Command::Ask(prompt) => {
                if session.mode != Mode::Chatbot {
                    println!("Switch to /mode 3 to chat.");
                    continue;
                }
                ask(&api, &mut session, prompt).await;
            }
        }
    }

    Ok(())
}
