use anyhow::Context;

use crate::state::AppState;

/// Resolve `token`, run `prompt` through the configured runner and print
/// the reply.
pub async fn run(state: &AppState, token: &str, prompt: &str) -> anyhow::Result<()> {
    let record = state
        .store
        .find_session_by_token(token)
        .await?
        .with_context(|| format!("Invalid token: {token}"))?;

    let output = state
        .dispatcher
        .execute(&record, prompt)
        .await
        .with_context(|| format!("{} runner failed", state.runner.name()))?;

    if output.final_text.trim().is_empty() {
        println!("Command sent to {} runner.", state.runner.name());
    } else {
        println!("{}", output.final_text);
    }
    Ok(())
}
