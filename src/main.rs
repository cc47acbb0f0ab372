use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    topograph_lib::run().await
}
