use crate::core::{
    command_init::{CommandContext, CommandInit},
    error::{Result, StatusCacheError},
    file_ref::FileRef,
    fs_ops,
    output::print_success,
};

pub fn execute_move(from: String, to: String) -> Result<()> {
    let context = CommandInit::initialize()?;
    let (from, to) = resolve_pair(&context, &from, &to)?;

    if context.interceptor.before_move(&from, &to) {
        context.interceptor.do_move(&from, &to)?;
    } else {
        fs_ops::move_path(from.path(), to.path())?;
    }
    context.interceptor.after_move(&from, &to);

    print_success(&format!(
        "Moved {} to {}",
        context.display_path(&from),
        context.display_path(&to)
    ));
    context.finish()
}

pub fn execute_copy(from: String, to: String) -> Result<()> {
    let context = CommandInit::initialize()?;
    let (from, to) = resolve_pair(&context, &from, &to)?;

    if context.interceptor.before_copy(&from, &to) {
        context.interceptor.do_copy(&from, &to)?;
    } else {
        fs_ops::copy_tree(from.path(), to.path(), |_| false)?;
    }
    context.interceptor.after_copy(&from, &to);

    print_success(&format!(
        "Copied {} to {}",
        context.display_path(&from),
        context.display_path(&to)
    ));
    context.finish()
}

/// Resolve source and destination; an existing destination directory
/// receives the source under its own name
fn resolve_pair(context: &CommandContext, from: &str, to: &str) -> Result<(FileRef, FileRef)> {
    let from = context.resolve(from);
    if !from.exists() {
        return Err(StatusCacheError::file_not_found(from.into_path_buf()));
    }
    let mut to = context.resolve(to);
    if to.is_dir() {
        if let Some(name) = from.file_name() {
            to = to.join(name);
        }
    }
    Ok((from, to))
}
