fn main() {
    if let Err(error) = xqpath_cli::run() {
        // Tracing is initialized inside run() after argument parsing.
        tracing::error!(error = format!("{error:#}"), "query failed");
        xqpath_cli::report_error(&error);
        std::process::exit(1);
    }
}
