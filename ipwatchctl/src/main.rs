use clap::Parser;

fn main() {
    let cli = ipwatchctl::Cli::parse();
    if let Err(err) = ipwatchctl::run(cli) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
