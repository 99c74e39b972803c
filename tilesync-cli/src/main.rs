//! Entry point for the command-line interface.
#![forbid(unsafe_code)]

use tilesync_cli::CliError;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    match tilesync_cli::run() {
        Ok(()) => {}
        Err(CliError::ArgumentParsing(err)) => err.exit(),
        Err(err) => {
            report(&err);
            std::process::exit(err.exit_code());
        }
    }
}

#[expect(
    clippy::print_stderr,
    reason = "the binary reports its final error on stderr"
)]
fn report(err: &CliError) {
    eprintln!("tilesync: {err}");
}
