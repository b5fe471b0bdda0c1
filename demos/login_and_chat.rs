//! Login and STOMP chat example.
//!
//! This program logs in against the backend, reuses the session cookies for
//! the websocket handshake, publishes one chat message, and prints whatever
//! the broker routes back until the connection ends.
//!
//! Before running:
//! - Set `CHAT_API_URL` and `CHAT_WS_URL` if the backend is not on
//!   `localhost:8080`.
//! - Replace the credential placeholders below.
//!
//! Set `RUST_LOG=chat_session_sdk=debug` to see lifecycle logs.

use std::error::Error;

use chat_session_sdk::channel::{ChannelConfig, ChannelEvent, ChannelState, RealtimeChannel};
use chat_session_sdk::session_api::{SessionClient, SessionClientOptions};
use secrecy::SecretString;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let username = "cyper";
    let password = SecretString::new("REPLACE_WITH_PASSWORD".to_string());

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let client = SessionClient::with_options(SessionClientOptions::from_env())?;
        let login = client.login(username, &password).await?;
        println!("login code={} message={}", login.code, login.message);
        if !client.is_authenticated() {
            return Ok(());
        }

        let config = ChannelConfig::stomp_from_env()
            .with_subscription("/topic/class403")
            .with_cookie(client.cookie_header());
        let mut channel = RealtimeChannel::new(config);
        let mut events = channel.connect()?;

        while let Some(event) = events.next_event().await {
            match event {
                ChannelEvent::State(ChannelState::Connected) => {
                    println!("connected");
                    channel.publish(format!("{username} joined"))?;
                }
                ChannelEvent::State(state) => println!("state={state:?}"),
                ChannelEvent::Message(message) => println!(
                    "destination={} body={}",
                    message.destination.unwrap_or_default(),
                    message.body
                ),
                ChannelEvent::Error(failure) => println!("error={failure}"),
            }
        }

        channel.disconnect().await;
        client.logout().await?;
        Ok::<(), Box<dyn Error>>(())
    })
}
