use clap::Parser;
use docrun::cli;
use tracing::error;

#[tokio::main]
async fn main() {
    let args = cli::Args::parse();
    match cli::dispatch(args).await {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            error!("{:#}", err);
            eprintln!("docrun: {:#}", err);
            std::process::exit(1);
        }
    }
}
