use clap::Parser;

mod cli;

#[tokio::main]
async fn main() {
    let args = cli::Cli::parse();
    cli::init_tracing(args.debug);

    if let Err(e) = cli::run_command(args).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
