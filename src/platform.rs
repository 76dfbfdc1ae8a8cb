use std::io;
use std::path::Path;
use std::process::Command;

/// The desktop helper that opens a directory in the file manager.
pub fn folder_opener() -> &'static str {
    if cfg!(target_os = "windows") {
        "explorer"
    } else if cfg!(target_os = "macos") {
        "open"
    } else {
        "xdg-open"
    }
}

/// Shows `dir` in the platform file manager without waiting for it.
pub fn open_folder(dir: &Path) -> io::Result<()> {
    if dir.as_os_str().is_empty() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty folder path"));
    }
    if !dir.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} is not a directory", dir.display()),
        ));
    }
    Command::new(folder_opener()).arg(dir).spawn().map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opener_matches_the_platform() {
        let opener = folder_opener();
        #[cfg(target_os = "linux")]
        assert_eq!(opener, "xdg-open");
        assert!(!opener.is_empty());
    }

    #[test]
    fn refuses_paths_that_are_not_directories() {
        let err = open_folder(Path::new("")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);

        let file = tempfile::NamedTempFile::new().unwrap();
        let err = open_folder(file.path()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
