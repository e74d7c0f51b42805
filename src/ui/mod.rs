pub mod banner;
pub mod repl;
pub mod selector;

use std::io::{self, BufRead, Write};

/// Prompt and read one trimmed line; `None` on EOF or read error.
pub(crate) fn read_line(prompt: &str) -> Option<String> {
    print!("{prompt}");
    io::stdout().flush().ok()?;

    let mut line = String::new();
    match io::stdin().lock().read_line(&mut line) {
        Ok(0) => None,
        Ok(_) => Some(line.trim().to_string()),
        Err(_) => None,
    }
}
