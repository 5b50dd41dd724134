use std::process::ExitCode;

fn main() -> ExitCode {
    reflex_cli::run()
}
