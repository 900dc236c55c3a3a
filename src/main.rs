use razorsp::create_service;
use tower_lsp::Server;
use tracing_subscriber::EnvFilter;

/// `RAZORSP_LOG` > `RUST_LOG` > `info`. Logs go to stderr; stdout carries
/// the protocol.
fn init_logging() {
    let filter = std::env::var("RAZORSP_LOG")
        .ok()
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init();
}

#[tokio::main]
async fn main() {
    init_logging();

    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();

    let (service, socket) = create_service();
    Server::new(stdin, stdout, socket).serve(service).await;
}
