mod cli;
mod simulate;

use std::process::ExitCode;

use clap::Parser;

fn main() -> ExitCode {
    let args = cli::Cli::parse();

    let res: Result<(), cli::CliError> = match args.cmd {
        cli::Cmd::Config => {
            println!("{}", msgwin_core::config::default_app_config_json());
            Ok(())
        }
        cli::Cmd::Simulate(s) => simulate::simulate(args.json, args.verbose, s),
    };

    match res {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => cli::render_err(args.json, e),
    }
}
