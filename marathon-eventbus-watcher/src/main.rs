use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    marathon_eventbus_watcher::run().await?;
    Ok(())
}
