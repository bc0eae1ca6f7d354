//! Colour scheme for file statuses.
//!
//! Every status-coloured piece of CLI output goes through
//! [`get_status_color_style`], so one status always renders in one colour.

use crate::core::status::{FileStatus, StatusInfo};
use colored::*;

/// Colour function for `status`
pub fn get_status_color_style(status: FileStatus) -> Box<dyn Fn(&str) -> ColoredString> {
    match status {
        FileStatus::Modified | FileStatus::Merged => Box::new(|text: &str| text.yellow()),
        FileStatus::Added => Box::new(|text: &str| text.green()),
        FileStatus::DeletedLocally | FileStatus::RemovedLocally => {
            Box::new(|text: &str| text.red())
        }
        FileStatus::ConflictContent | FileStatus::ConflictTree => {
            Box::new(|text: &str| text.red().bold())
        }
        FileStatus::NewLocally => Box::new(|text: &str| text.cyan()),
        FileStatus::NewInRepository => Box::new(|text: &str| text.blue()),
        FileStatus::Excluded | FileStatus::NotManaged | FileStatus::Unknown => {
            Box::new(|text: &str| text.bright_black())
        }
        FileStatus::UpToDate => Box::new(|text: &str| text.normal()),
    }
}

/// Coloured status code padded to two columns
pub fn get_aligned_status(status: FileStatus) -> ColoredString {
    let color_fn = get_status_color_style(status);
    color_fn(&format!("{:<2}", status.as_str()))
}

pub fn get_colored_path(status: FileStatus, path: &str) -> ColoredString {
    get_status_color_style(status)(path)
}

/// One listing line: code, path and lock marker
pub fn format_file_status(info: &StatusInfo, path: &str) -> String {
    let status = info.status();
    let mut line = format!(
        "{} {}",
        get_aligned_status(status),
        get_colored_path(status, path)
    );
    if info.flags().locked {
        line.push_str(&format!(" {}", "[locked]".magenta()));
    }
    line
}
