use std::path::PathBuf;
use std::process;

use log::error;

use wsipatch::commands::{build_cli, CommandFactory, WsiPatchCommandFactory};
use wsipatch::utils::logger;

fn main() {
    let matches = build_cli().get_matches();

    let log_file = matches.get_one::<String>("log-file").map(PathBuf::from);
    if let Err(e) = logger::init(matches.get_count("verbose"), log_file.as_deref()) {
        eprintln!("Error initializing logger: {}", e);
        process::exit(1);
    }

    let factory = WsiPatchCommandFactory::new();
    match factory.create_command(&matches) {
        Ok(command) => {
            if let Err(e) = command.execute() {
                error!("Command execution error: {}", e);
                eprintln!("Error: {}", e);
                process::exit(1);
            }
        }
        Err(e) => {
            error!("Failed to create command: {}", e);
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}
