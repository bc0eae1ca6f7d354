use crate::core::{
    command_init::CommandInit,
    error::Result,
    status::StatusMask,
};
use colored::*;

/// Report whether anything under the given roots has local changes
pub fn execute_dirty(paths: Vec<String>) -> Result<bool> {
    let context = CommandInit::initialize()?;
    let roots = context.resolve_all(&paths);
    for root in &roots {
        context.store.scan_tree(root);
    }

    let dirty = context.store.contains_files(&roots, StatusMask::LOCAL_CHANGE);
    if dirty {
        println!("{}", "dirty".yellow());
    } else {
        println!("{}", "clean".green());
    }
    context.finish()?;
    Ok(dirty)
}
