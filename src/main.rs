use clap::Parser;
use editx::cli::Cli;

fn main() {
    let cli = Cli::parse();

    editx::infra::logging::init(cli.verbose, cli.no_color);

    editx::commands::finish_with_exit(editx::commands::run(cli))
}
