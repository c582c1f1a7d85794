#[tokio::main]
async fn main() {
    let code = msgflow::app::startup::startup().await;
    std::process::exit(code);
}
