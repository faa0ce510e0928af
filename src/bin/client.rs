use anyhow::{bail, Result};
use chat_session::config::Config;
use chat_session::models::{DeliveryState, Message, MessageId};
use chat_session::{connect, SessionError, SessionSnapshot, SessionState};
use dotenv::dotenv;
use std::collections::HashMap;
use std::env;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;

fn render(message: &Message, me: &str) -> String {
    let who = if message.sender_id == me { "you" } else { message.sender_id.as_str() };
    match &message.delivery_state {
        DeliveryState::Confirmed => format!("{}: {}", who, message.text),
        state => format!("{}: {}  ({})", who, message.text, state),
    }
}

/// Prints messages that are new or changed since the last snapshot, and
/// typing indicator changes.
async fn feed(mut updates: watch::Receiver<SessionSnapshot>, me: String) {
    let mut shown: HashMap<MessageId, String> = HashMap::new();
    let mut banner: Option<String> = None;

    loop {
        let snapshot = updates.borrow_and_update().clone();
        for message in &snapshot.messages {
            let line = render(message, &me);
            if shown.get(&message.id) != Some(&line) {
                println!("{}", line);
                shown.insert(message.id.clone(), line);
            }
        }
        let current = snapshot.typing_banner();
        if current != banner {
            if let Some(text) = &current {
                println!("... {}", text);
            }
            banner = current;
        }
        if snapshot.state == SessionState::Disconnected {
            println!("not connected");
            break;
        }
        if updates.changed().await.is_err() {
            break;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    env_logger::init();

    let mut config = Config::from_env()?;
    let mut args = env::args().skip(1);
    let Some(participant_id) = args.next() else {
        bail!("usage: client <participant-id> [relay-addr]");
    };
    if let Some(addr) = args.next() {
        config.relay_addr = addr;
    }

    let connection = connect(&config.relay_addr, &participant_id, config.session).await?;
    let session = connection.session.clone();
    let feed = tokio::spawn(feed(session.subscribe(), participant_id.clone()));
    println!("Type a message and hit ENTER, /quit to leave");

    let stdin = tokio::io::stdin();
    let mut reader = BufReader::new(stdin);
    let mut input = String::new();

    loop {
        input.clear();
        if reader.read_line(&mut input).await? == 0 {
            break;
        }
        let text = input.trim_end_matches(['\r', '\n']);
        if text.trim().eq_ignore_ascii_case("/quit") {
            break;
        }

        // one line is one keystroke burst followed by a submit
        if let Err(e) = session.typing_keystroke().await {
            println!("{}", e);
            break;
        }
        match session.send(text).await {
            Ok(_) => {}
            // keep the prompt as is
            Err(SessionError::EmptyMessage) => continue,
            Err(e) => {
                println!("{}", e);
                break;
            }
        }
    }

    session.disconnect()?;
    let _ = feed.await;
    connection.closed().await?;
    Ok(())
}
