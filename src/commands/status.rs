use crate::core::{
    colors::format_file_status,
    command_init::{CommandContext, CommandInit},
    error::Result,
    output::print_field,
};

/// Print the status of each path, with the backend record when there is one
pub fn execute_status(paths: Vec<String>) -> Result<()> {
    let context = CommandInit::initialize()?;
    print_status(&context, &paths);
    context.finish()
}

pub fn print_status(context: &CommandContext, paths: &[String]) {
    for file in context.resolve_all(paths) {
        let info = context.store.get_status(&file);
        log::debug!("status of {file}: {info}");
        println!("{}", format_file_status(&info, &context.display_path(&file)));

        print_field("Status", info.status().description());
        if let Some(entry) = info.entry() {
            if let Some(revision) = &entry.revision {
                print_field("Revision", revision);
            }
            if let Some(url) = &entry.url {
                print_field("Url", url);
            }
            if entry.copied {
                print_field("Copied", "yes");
            }
        }
        if let Some(owner) = info.lock_owner() {
            print_field("Lock owner", owner);
        }
    }
}
