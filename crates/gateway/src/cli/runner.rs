use cr_runners::Runner;

/// Forget stored continuations for `key`, or all of them.
pub async fn clear(runner: &dyn Runner, key: Option<&str>) -> anyhow::Result<()> {
    let cleared = runner.clear_sessions(key).await?;
    match (key, cleared) {
        (Some(key), true) => println!("Cleared continuation for {key}"),
        (Some(key), false) => println!("No continuation stored for {key}"),
        (None, true) => println!("Cleared all continuations"),
        (None, false) => println!("No continuations stored"),
    }
    Ok(())
}
