use redshift_provider::{init_logging, serve, RedshiftProvider};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();
    serve(RedshiftProvider::new()).await
}
