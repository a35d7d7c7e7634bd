use std::process::ExitCode;

fn main() -> ExitCode {
    dex_cache::run_cli()
}
