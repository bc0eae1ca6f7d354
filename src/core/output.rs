//! Message formatting for the command-line front end.
//!
//! Errors go to stderr in red, everything else to stdout.

use colored::*;

/// ```text
/// ✕ Error: <message>
/// ```
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✕ Error:".red(), message);
}

pub fn print_success(message: &str) {
    println!("{} {}", "✓".green(), message);
}

pub fn print_info(message: &str) {
    println!("{}", message.white());
}

/// Key/value line of a detail view, key muted
pub fn print_field(key: &str, value: &str) {
    println!("  {:<14}{}", format!("{key}:").bright_black(), value);
}

pub fn print_section_header(header: &str) {
    println!("{}", format!("{header}:").bold());
}
