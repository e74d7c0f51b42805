use crate::ui::read_line;

/// Print a numbered list and let the user pick one entry.
/// Returns `None` on cancel, EOF, or an invalid selection.
pub fn select_index(options: &[String], title: &str) -> Option<usize> {
    if options.is_empty() {
        return None;
    }

    println!("{title}:");
    for (idx, option) in options.iter().enumerate() {
        println!("  {}. {option}", idx + 1);
    }

    let sel = read_line("Select number (Enter to cancel): ")?;
    if sel.is_empty() {
        return None;
    }
    let choice: usize = match sel.parse() {
        Ok(n) => n,
        Err(_) => {
            println!("Invalid selection.");
            return None;
        }
    };
    if choice < 1 || choice > options.len() {
        println!("Out of range.");
        return None;
    }
    Some(choice - 1)
}
