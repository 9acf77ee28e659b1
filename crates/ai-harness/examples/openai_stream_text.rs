use std::sync::Arc;

use ai_harness::prelude::*;
use ai_harness::vendors::openai_responses::OpenAiResponsesProvider;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), HarnessError> {
    ai_harness::init_observability();

    let harness = Harness::builder()
        .register_provider(Arc::new(OpenAiResponsesProvider::from_env()?))
        .with_builtin_models()
        .build()?;
    let model = harness
        .model("openai", "gpt-5-mini")
        .ok_or_else(|| HarnessError::Validation("gpt-5-mini missing from catalog".into()))?;

    let context = Context::new(vec![Message::user("Stream a greeting.")])
        .system_prompt("Reply to test AI harness streaming.");
    let options = SimpleStreamOptions::default().reasoning(ThinkingLevel::Low);
    let stream = harness.stream_simple(&model, context, options)?;

    while let Some(event) = stream.next().await {
        match event {
            AssistantMessageEvent::ThinkingDelta { delta, .. } => eprint!("{delta}"),
            AssistantMessageEvent::TextDelta { delta, .. } => print!("{delta}"),
            AssistantMessageEvent::Done { .. } => println!(),
            AssistantMessageEvent::Error { error, .. } => {
                eprintln!("call failed: {}", error.error_message.unwrap_or_default())
            }
            _ => {}
        }
    }

    if let Some(message) = stream.result().await {
        eprintln!(
            "[{:?}] in={} out={} cost=${:.6}",
            message.stop_reason, message.usage.input, message.usage.output, message.usage.cost.total
        );
    }
    Ok(())
}
