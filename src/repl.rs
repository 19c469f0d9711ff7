use std::io::{self, Write};

pub struct Repl {}

impl Repl {
    /// Reads one trimmed command line; None on end of input.
    pub fn read_line(&self) -> Result<Option<String>, io::Error> {
        print!("> ");
        io::stdout().flush()?;
        let mut buffer = String::new();
        if io::stdin().read_line(&mut buffer)? == 0 {
            return Ok(None);
        }
        Ok(Some(buffer.trim().to_string()))
    }
}
