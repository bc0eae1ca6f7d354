use crate::core::{
    colors::format_file_status,
    command_init::CommandInit,
    error::Result,
    output::print_info,
    status::StatusMask,
};

/// List every file under the given roots whose status matches `status`
/// (a comma separated list of status names or groups, default `interesting`)
pub fn execute_list(paths: Vec<String>, status: Option<String>) -> Result<()> {
    let mask = match status {
        Some(names) => names.parse::<StatusMask>()?,
        None => StatusMask::INTERESTING,
    };

    let context = CommandInit::initialize()?;
    let roots = context.resolve_all(&paths);
    for root in &roots {
        let scanned = context.store.scan_tree(root);
        log::debug!("scanned {scanned} directories under {root}");
    }

    let files = context.store.list_files(&roots, mask);
    if files.is_empty() {
        print_info("No matching files");
    }
    for file in &files {
        let info = context.store.get_status(file);
        println!("{}", format_file_status(&info, &context.display_path(file)));
    }
    context.finish()
}
