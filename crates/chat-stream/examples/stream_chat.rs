use std::collections::HashSet;
use std::sync::Arc;

use chat_stream::http::HttpAgentClient;
use chat_stream::MessageId;
use chat_stream::prelude::*;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), ChatError> {
    let client = ChatClient::builder()
        .transport(Arc::new(HttpAgentClient::from_env()?))
        .user_id("demo")
        .on_error(|failure| eprintln!("stream problem: {failure}"))
        .build()?;

    let thread_id = std::env::var("CHAT_THREAD_ID").unwrap_or_else(|_| "demo-thread".into());
    let prompt = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    let prompt = if prompt.trim().is_empty() {
        "Say hello and tell me what tools you have.".to_string()
    } else {
        prompt
    };

    let session = client.session(&thread_id)?;
    let history = client.history(&thread_id).await?;
    let mut stream = session.start_submit(history.into_messages(), prompt).await?;

    let mut current: Option<MessageId> = None;
    let mut printed = 0usize;
    let mut announced: HashSet<String> = HashSet::new();
    while let Some(event) = stream.next_event().await {
        match event {
            SessionEvent::Snapshot { transcript, .. } => {
                let Some(last) = transcript.last() else {
                    continue;
                };
                if last.role != Role::Assistant {
                    continue;
                }
                for call in &last.tool_calls {
                    if announced.insert(call.call_id.clone()) {
                        println!("\n[tool call] {}({})", call.name, call.arguments);
                    }
                }
                if current.as_ref() != Some(&last.id) {
                    current = Some(last.id.clone());
                    printed = 0;
                }
                let text = last.content.to_text();
                if let Some(delta) = text.get(printed..) {
                    print!("{delta}");
                }
                printed = text.len();
            }
            SessionEvent::AgentError { notice, .. } => {
                eprintln!("\n[agent error] {} ({})", notice.message, notice.error_type)
            }
            SessionEvent::Completed { .. } | SessionEvent::Cancelled { .. } => println!(),
            SessionEvent::Failed { error, .. } => eprintln!("\nstream failed: {error}"),
            SessionEvent::Started { .. } => {}
        }
    }

    let outcome = stream.finish().await?;
    println!("transcript now holds {} messages", outcome.transcript().len());
    Ok(())
}
