use std::env;

#[tokio::main]
async fn main() {
    if let Err(e) = survival::logging::init_logging("info") {
        eprintln!("Logging setup failed: {e}");
    }

    let raw_args: Vec<String> = env::args().collect();
    match raw_args.get(1).map(|s| s.as_str()) {
        Some("serve") => {
            let port = raw_args
                .get(2)
                .and_then(|s| s.parse::<u16>().ok())
                .unwrap_or(8080);
            if let Err(e) = survival::api::run_http_server(port).await {
                eprintln!("Server error: {e}");
                std::process::exit(1);
            }
            return;
        }
        Some("sweep") => {
            let args = raw_args[1..].to_vec();
            let outcome = tokio::task::spawn_blocking(move || survival::api::run_cli(args)).await;
            match outcome {
                Ok(Ok(())) => return,
                Ok(Err(e)) => eprintln!("Error: {e}"),
                Err(e) => eprintln!("Sweep aborted: {e}"),
            }
            std::process::exit(1);
        }
        _ => {}
    }

    eprintln!("Usage: survival serve [port] | survival sweep --data <file.json> [options]");
    std::process::exit(1);
}
