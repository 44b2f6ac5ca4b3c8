use std::io::Write;
use tempfile::NamedTempFile;

/// Writes a replay script with one JSON operation per line.
pub fn script_file(lines: &[&str]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    for line in lines {
        writeln!(file, "{line}").unwrap();
    }
    file
}
