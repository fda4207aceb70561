fn main() {
    if let Err(e) = fin_analyzer::run() {
        tracing::error!(error = %e, "Service terminated");
        eprintln!("fin-analyzer: {e}");
        std::process::exit(1);
    }
}
