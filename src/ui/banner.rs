use crossterm::style::Stylize;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

const LOGO: &str = r"
██╗  ██╗███████╗███████╗████████╗██████╗ ███████╗██╗
██║ ██╔╝██╔════╝██╔════╝╚══██╔══╝██╔══██╗██╔════╝██║
█████╔╝ █████╗  ███████╗   ██║   ██████╔╝█████╗  ██║
██╔═██╗ ██╔══╝  ╚════██║   ██║   ██╔══██╗██╔══╝  ██║
██║  ██╗███████╗███████║   ██║   ██║  ██║███████╗███████╗
╚═╝  ╚═╝╚══════╝╚══════╝   ╚═╝   ╚═╝  ╚═╝╚══════╝╚══════╝";

pub fn print_banner() {
    println!();
    let mut lines = LOGO.lines().filter(|l| !l.is_empty()).peekable();
    while let Some(line) = lines.next() {
        if lines.peek().is_some() {
            println!("{line}");
        } else {
            println!("{line} {}", VERSION.bold());
        }
    }
    println!();
    println!(
        "{}",
        "[*] Starting interactive mode. Use CTRL+d to exit."
            .dark_yellow()
            .bold()
    );
}

/// Mask a secret for display, keeping only the outer characters.
pub fn mask_secret(val: &str) -> String {
    let len = val.chars().count();
    if len == 0 {
        return String::new();
    }
    if len <= 6 {
        return "*".repeat(len);
    }
    let head: String = val.chars().take(2).collect();
    let tail: String = val.chars().skip(len - 2).collect();
    format!("{head}{}{tail}", "*".repeat(len - 4))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_secret_keeps_outer_chars() {
        assert_eq!(mask_secret(""), "");
        assert_eq!(mask_secret("abc"), "***");
        assert_eq!(mask_secret("abcdefgh"), "ab****gh");
    }
}
