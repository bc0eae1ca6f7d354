use crate::core::{
    command_init::CommandInit,
    error::Result,
    output::{print_field, print_section_header},
};
use std::time::Duration;

const LABEL_TIMEOUT: Duration = Duration::from_secs(30);

/// Print revision labels of the given paths, waiting for them to be computed
pub fn execute_label(paths: Vec<String>, mime: bool) -> Result<()> {
    let context = CommandInit::initialize()?;
    let labels = context.label_cache()?;
    let files = context.resolve_all(&paths);

    for file in &files {
        labels.get_label_info_now(file, mime);
    }
    if !labels.wait_idle(LABEL_TIMEOUT) {
        log::warn!("Labels still being computed after {LABEL_TIMEOUT:?}");
    }

    for file in &files {
        let label = labels.get_label_info(file, mime);
        print_section_header(&context.display_path(file));
        if label.is_fake() {
            print_field("Label", "-");
            continue;
        }
        print_field("Revision", &label.revision);
        print_field("Last revision", &label.last_revision);
        print_field("Author", &label.last_author);
        print_field("Date", &label.last_date);
        print_field("Branch", &label.sticky);
        if mime {
            print_field("Mime type", label.mime());
        }
    }
    drop(labels);
    context.finish()
}
