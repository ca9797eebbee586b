use justifai_issuer::server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    server::run().await
}
