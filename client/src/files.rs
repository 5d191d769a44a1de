use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Where the reply for `input` is written: `<stem>-received.<ext>` next to
/// the input, or `<name>-received` when it has no extension.
pub fn received_path(input: &Path) -> PathBuf {
    let mut name = OsString::from(input.file_stem().unwrap_or(input.as_os_str()));
    name.push("-received");
    if let Some(ext) = input.extension() {
        name.push(".");
        name.push(ext);
    }
    input.with_file_name(name)
}
