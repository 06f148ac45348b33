fn main() {
    if let Err(err) = copilot_runtime::cli::run_copilot_runtime() {
        tracing::error!(error = %err, "copilot-runtime failed");
        std::process::exit(1);
    }
}
