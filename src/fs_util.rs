use std::fs;
use std::io::{self, ErrorKind};
use std::path::Path;

/// Ids of files named `{id:09}.{extension}` in `directory`, ascending.
pub(crate) fn numbered_files(directory: &Path, extension: &str) -> io::Result<Vec<u32>> {
    let mut ids = Vec::new();
    for entry in fs::read_dir(directory)? {
        let file_name = entry?.file_name();
        let file_name = match file_name.to_str() {
            Some(name) => name,
            None => continue,
        };
        if let Some(id) = parse_numbered_file_name(file_name, extension) {
            ids.push(id);
        }
    }

    ids.sort_unstable();
    Ok(ids)
}

pub(crate) fn numbered_file_name(id: u32, extension: &str) -> String {
    format!("{:09}.{}", id, extension)
}

fn parse_numbered_file_name(file_name: &str, extension: &str) -> Option<u32> {
    let stem = file_name.strip_suffix(extension)?.strip_suffix('.')?;
    if stem.len() != 9 || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

/// Removes a file, treating "already gone" as success.
pub(crate) fn remove_file_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_only_exact_names() {
        assert_eq!(parse_numbered_file_name("000000012.log", "log"), Some(12));
        assert_eq!(parse_numbered_file_name("000000012.snapshot", "log"), None);
        assert_eq!(parse_numbered_file_name("12.log", "log"), None);
        assert_eq!(parse_numbered_file_name("000000012.log.tmp", "log"), None);
        assert_eq!(parse_numbered_file_name("00000001x.log", "log"), None);
        assert_eq!(numbered_file_name(12, "log"), "000000012.log");
    }

    #[test]
    fn lists_sorted_ids() {
        let dir = tempfile::tempdir().unwrap();
        for name in &["000000003.log", "000000001.log", "000000002.snapshot", "junk"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        assert_eq!(numbered_files(dir.path(), "log").unwrap(), vec![1, 3]);
    }
}
