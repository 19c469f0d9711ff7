use std::sync::Arc;

use memory_manager::{
    DefaultMemoryManager, ProcessCommand, COMMAND_TIMEOUT, PAGE_SIZE,
};

/// A parsed line from the command surface: a verb and its arguments.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    NewProcess { kilobytes: usize },
    ListProcess,
    EndProcess { pid: usize },
    RequestMem { pid: usize, kilobytes: usize },
    AccessMem { pid: usize, address: usize },
    PrintMem,
    Help,
    End,
}

#[derive(Debug, PartialEq)]
pub enum CommandError {
    UnrecognizedCommand(String),
    InvalidArguments(&'static str),
}

fn parse_arg(word: Option<&str>, usage: &'static str) -> Result<usize, CommandError> {
    word.and_then(|word| word.parse().ok())
        .ok_or(CommandError::InvalidArguments(usage))
}

impl Command {
    pub fn parse(line: &str) -> Result<Command, CommandError> {
        let mut words = line.split_whitespace();
        let verb = words
            .next()
            .ok_or(CommandError::InvalidArguments("empty command"))?;
        let command = match verb {
            "Newprocess" => Command::NewProcess {
                kilobytes: parse_arg(words.next(), "Usage: Newprocess <memory_in_KB>")?,
            },
            "listprocess" => Command::ListProcess,
            "endprocess" => Command::EndProcess {
                pid: parse_arg(words.next(), "Usage: endprocess <pid>")?,
            },
            "requestmem" => Command::RequestMem {
                pid: parse_arg(words.next(), "Usage: requestmem <pid> <size_kb>")?,
                kilobytes: parse_arg(words.next(), "Usage: requestmem <pid> <size_kb>")?,
            },
            "accessmem" => Command::AccessMem {
                pid: parse_arg(words.next(), "Usage: accessmem <pid> <address>")?,
                address: parse_arg(words.next(), "Usage: accessmem <pid> <address>")?,
            },
            "printmem" => Command::PrintMem,
            "help" => Command::Help,
            "end" => Command::End,
            other => return Err(CommandError::UnrecognizedCommand(other.to_string())),
        };
        Ok(command)
    }
}

/// Executes one parsed command against the manager, printing the outcome.
/// Returns false when the program should exit.
pub fn execute(manager: &Arc<DefaultMemoryManager>, command: Command) -> bool {
    match command {
        Command::NewProcess { kilobytes } => match manager.spawn_process(kilobytes * 1024) {
            Ok(pid) => println!("Created process {} with {}KB memory", pid, kilobytes),
            Err(e) => println!(
                "Failed to create process with {}KB memory: {:?}",
                kilobytes, e
            ),
        },
        Command::ListProcess => {
            println!("\nActive Processes:");
            for info in manager.list_processes() {
                println!(
                    "PID: {}, Memory: {} bytes, Pages: {}",
                    info.pid, info.memory_size, info.pages
                );
            }
        }
        Command::EndProcess { pid } => {
            match manager.dispatch_and_wait(pid, ProcessCommand::EndProcess, COMMAND_TIMEOUT) {
                Ok(true) => println!("Process {} ended", pid),
                Ok(false) => println!(
                    "Warning: timeout waiting for process {} to end; terminated it directly",
                    pid
                ),
                Err(_) => println!(
                    "Error: Process {} does not exist or is no longer running",
                    pid
                ),
            }
        }
        Command::RequestMem { pid, kilobytes } => {
            match manager.dispatch_and_wait(
                pid,
                ProcessCommand::RequestMemory(kilobytes * 1024),
                COMMAND_TIMEOUT,
            ) {
                Ok(true) => println!("Memory request of {}KB sent to process {}", kilobytes, pid),
                Ok(false) => println!("Warning: timeout waiting for memory request to complete"),
                Err(_) => println!(
                    "Error: Process {} does not exist or is no longer running",
                    pid
                ),
            }
        }
        Command::AccessMem { pid, address } => {
            match manager.dispatch_and_wait(pid, ProcessCommand::AccessMemory(address), COMMAND_TIMEOUT)
            {
                Ok(true) => {
                    let page_number = address / PAGE_SIZE;
                    let offset = address % PAGE_SIZE;
                    let status = manager.memory_status();
                    match status
                        .frames
                        .iter()
                        .find(|frame| frame.owner == Some((pid, page_number)))
                    {
                        Some(frame) => println!(
                            "Logical address {} (Page: {}, Offset: {}) -> Physical address {} (Frame: {}, Offset: {})",
                            address,
                            page_number,
                            offset,
                            frame.frame_number * PAGE_SIZE + offset,
                            frame.frame_number,
                            offset
                        ),
                        None => println!(
                            "Invalid memory access: address {} not mapped for process {}",
                            address, pid
                        ),
                    }
                }
                Ok(false) => println!("Warning: timeout waiting for memory access to complete"),
                Err(_) => println!(
                    "Error: Process {} does not exist or is no longer running",
                    pid
                ),
            }
        }
        Command::PrintMem => print_memory(manager),
        Command::Help => print_help(),
        Command::End => return false,
    }
    true
}

fn print_memory(manager: &Arc<DefaultMemoryManager>) {
    let status = manager.memory_status();

    println!("\nPhysical Memory Status:");
    for frame in &status.frames {
        match frame.owner {
            Some((pid, page_number)) => println!(
                "Frame {:>2}: Allocated  (Process: {}, Page: {})",
                frame.frame_number, pid, page_number
            ),
            None if frame.allocated => println!(
                "Frame {:>2}: Allocated  (not in any page table)",
                frame.frame_number
            ),
            None => println!("Frame {:>2}: Free", frame.frame_number),
        }
    }

    println!("\nTLB Status:");
    if status.tlb.is_empty() {
        println!("No valid TLB entries");
    }
    for entry in &status.tlb {
        println!(
            "Entry {}: Process {} Page {} -> Frame {}",
            entry.slot, entry.pid, entry.page_number, entry.frame_number
        );
    }

    println!("\nBacking Store Files:");
    if status.spilled.is_empty() {
        println!("No backing store files in use");
    }
    for spill in &status.spilled {
        println!(
            "Process {} Page {} -> {}",
            spill.pid, spill.page_number, spill.filename
        );
    }
    println!(
        "Swap directory {:?}: {} files, {:.1} KB",
        status.swap_dir,
        status.swap_files,
        status.swap_bytes as f64 / 1024.0
    );
}

fn print_help() {
    println!("Available commands:");
    println!("  Newprocess <size_kb> - Create a new process with specified memory in KB");
    println!("  listprocess - List all active processes");
    println!("  endprocess <pid> - Terminate the specified process");
    println!("  requestmem <pid> <size_kb> - Request additional memory for a process");
    println!("  accessmem <pid> <address> - Access memory at specified address for a process");
    println!("  printmem - Display memory status");
    println!("  help - Show this text");
    println!("  end - Exit the program");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_verb() {
        assert_eq!(
            Command::parse("Newprocess 16"),
            Ok(Command::NewProcess { kilobytes: 16 })
        );
        assert_eq!(Command::parse("listprocess"), Ok(Command::ListProcess));
        assert_eq!(
            Command::parse("endprocess 3"),
            Ok(Command::EndProcess { pid: 3 })
        );
        assert_eq!(
            Command::parse("requestmem 2 8"),
            Ok(Command::RequestMem {
                pid: 2,
                kilobytes: 8
            })
        );
        assert_eq!(
            Command::parse("accessmem 1 4096"),
            Ok(Command::AccessMem {
                pid: 1,
                address: 4096
            })
        );
        assert_eq!(Command::parse("printmem"), Ok(Command::PrintMem));
        assert_eq!(Command::parse("help"), Ok(Command::Help));
        assert_eq!(Command::parse("end"), Ok(Command::End));
    }

    #[test]
    fn rejects_unknown_verbs() {
        assert_eq!(
            Command::parse("frobnicate 1"),
            Err(CommandError::UnrecognizedCommand(String::from(
                "frobnicate"
            )))
        );
    }

    #[test]
    fn rejects_missing_or_malformed_arguments() {
        assert!(matches!(
            Command::parse("Newprocess"),
            Err(CommandError::InvalidArguments(_))
        ));
        assert!(matches!(
            Command::parse("Newprocess many"),
            Err(CommandError::InvalidArguments(_))
        ));
        assert!(matches!(
            Command::parse("requestmem 2"),
            Err(CommandError::InvalidArguments(_))
        ));
        assert!(matches!(
            Command::parse("accessmem -1 0"),
            Err(CommandError::InvalidArguments(_))
        ));
    }

    #[test]
    fn ignores_surrounding_whitespace() {
        assert_eq!(
            Command::parse("  endprocess   7  "),
            Ok(Command::EndProcess { pid: 7 })
        );
    }
}
