use std::env;

use mirror_dl::cli::{self, CliArgs};

#[tokio::main]
async fn main() -> mirror_dl::Result<()> {
    let args = match CliArgs::parse(env::args().skip(1)) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("Error: {e}");
            cli::print_usage();
            std::process::exit(1);
        }
    };
    cli::run(&args).await
}
