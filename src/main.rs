use clap::{Args, Parser, Subcommand};
use netslide::{
    config::ServerConfigCli,
    server::MuxServer,
    service::token::{mint_token, DEFAULT_TOKEN_LENGTH, MAX_TOKEN_LENGTH, MIN_TOKEN_LENGTH},
};

/// Main entry point for the slidemux command-line tool.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Arguments {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Run the multiplex relay server.
    Serve(ServerConfigCli),
    /// Print a fresh presenter secret and its public socket id as JSON.
    Token(TokenArgs),
}

#[derive(Args, Debug)]
struct TokenArgs {
    /// Length of the generated secret
    #[arg(
        short,
        long,
        default_value_t = DEFAULT_TOKEN_LENGTH as u64,
        value_parser = clap::value_parser!(u64).range(MIN_TOKEN_LENGTH as u64..=MAX_TOKEN_LENGTH as u64)
    )]
    length: u64,
}

fn main() {
    let args = Arguments::parse();
    match args.mode {
        Mode::Serve(server_cli) => {
            match tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt.block_on(MuxServer::main(server_cli)),
                Err(e) => {
                    eprintln!("Failed to start the async runtime: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Mode::Token(TokenArgs { length }) => {
            let token = mint_token(length as usize);
            match serde_json::to_string_pretty(&token) {
                Ok(json) => println!("{}", json),
                Err(e) => {
                    eprintln!("Failed to encode token: {}", e);
                    std::process::exit(1);
                }
            }
        }
    }
}
