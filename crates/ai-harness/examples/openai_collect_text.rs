use ai_harness::prelude::*;

/// Uses the process-wide harness (every built-in adapter, configured from the
/// environment) and an OpenAI Chat Completions model.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), HarnessError> {
    let harness = Harness::global()?;
    let model = harness
        .model("openai", "gpt-4o-mini")
        .ok_or_else(|| HarnessError::Validation("gpt-4o-mini missing from catalog".into()))?;

    let context = Context::new(vec![Message::user("Say hello.")])
        .system_prompt("You are a concise assistant. Reply with a short sentence.");
    let message = ai_harness::complete(&model, context, StreamOptions::default().max_tokens(64)).await?;

    if message.stop_reason.is_failure() {
        eprintln!("call failed: {}", message.error_message.unwrap_or_default());
    } else {
        println!("{}", message.text());
    }
    Ok(())
}
