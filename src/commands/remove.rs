use crate::core::{
    command_init::CommandInit,
    error::{Result, StatusCacheError},
    fs_ops,
    output::print_success,
};

/// Delete paths, scheduling versioned ones for removal
pub fn execute_remove(paths: Vec<String>) -> Result<()> {
    let context = CommandInit::initialize()?;
    for arg in &paths {
        let file = context.resolve(arg);
        if !file.exists() {
            return Err(StatusCacheError::file_not_found(file.into_path_buf()));
        }

        if context.interceptor.before_delete(&file) {
            context.interceptor.do_delete(&file)?;
        } else {
            fs_ops::remove_path(file.path())?;
        }
        context.interceptor.after_delete(&file);
        print_success(&format!("Removed {}", context.display_path(&file)));
    }
    context.finish()
}
