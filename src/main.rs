use std::{env, sync::Arc, thread, time::Duration};

use log::error;
use memory_manager::{DefaultMemoryManager, RunMode};
use memory_sim::{
    commands::{self, Command, CommandError},
    repl::Repl,
};

fn main() {
    env_logger::init();
    let manual = env::args().any(|arg| arg == "--manual");
    let mode = if manual {
        RunMode::Driven
    } else {
        RunMode::Autonomous
    };
    let manager = match DefaultMemoryManager::init("backing_store", mode) {
        Ok(manager) => manager,
        Err(e) => {
            eprintln!("Failed to initialize memory manager: {}", e);
            return;
        }
    };

    if manual {
        run_manual(&manager);
    } else {
        run_autonomous(&manager);
    }
    manager.shutdown();
}

fn run_manual(manager: &Arc<DefaultMemoryManager>) {
    println!("Starting in manual mode. Type 'help' for commands, 'end' to exit.");
    let repl = Repl {};
    loop {
        let line = match repl.read_line() {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!("Failed to read input: {}", e);
                break;
            }
        };
        if line.is_empty() {
            continue;
        }
        match Command::parse(&line) {
            Ok(command) => {
                if !commands::execute(manager, command) {
                    break;
                }
            }
            Err(CommandError::UnrecognizedCommand(verb)) => {
                println!(
                    "Unknown command: {}. Type 'help' for available commands.",
                    verb
                );
            }
            Err(CommandError::InvalidArguments(usage)) => println!("Error: {}", usage),
        }
    }
    println!("Exiting program...");
}

fn run_autonomous(manager: &Arc<DefaultMemoryManager>) {
    println!("Starting in random mode with 5 initial processes...");
    manager.start_activity(5);
    for elapsed in 1..=10 {
        thread::sleep(Duration::from_secs(1));
        println!("\n--- Memory status at {} seconds ---", elapsed);
        commands::execute(manager, Command::PrintMem);
    }
    println!("Stopping all processes...");
}
