use std::error::Error;

use chat_session_sdk::channel::{ChannelConfig, ChannelEvent, ChannelState, RealtimeChannel};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let endpoint = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "ws://localhost:8080/ws".to_string());

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let mut channel = RealtimeChannel::new(ChannelConfig::raw(endpoint));
        let mut events = channel.connect()?;

        while let Some(event) = events.next_event().await {
            match event {
                ChannelEvent::State(ChannelState::Connected) => {
                    channel.send("", "ping")?;
                }
                ChannelEvent::Message(message) => {
                    println!("received {}", message.body);
                    break;
                }
                ChannelEvent::Error(failure) => println!("error={failure}"),
                ChannelEvent::State(state) => println!("state={state:?}"),
            }
        }

        channel.disconnect().await;
        Ok::<(), Box<dyn Error>>(())
    })
}
