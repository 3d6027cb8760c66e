use sqs_courier_cli::run_cli;

#[tokio::main]
async fn main() {
    if let Err(e) = run_cli().await {
        // Logging may not be initialised when configuration fails.
        eprintln!("sqs-courier: {}", e);
        std::process::exit(e.exit_code());
    }
}
