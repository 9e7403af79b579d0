#[tokio::main]
async fn main() {
    if let Err(e) = pawachat_lib::run().await {
        log::error!("Fatal error: {:?}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
