//! Locating and querying the ffmpeg tools.

use std::env;
use std::path::{Path, PathBuf};
use std::process::{Command as ProcessCommand, Stdio};

use anyhow::{bail, Context, Result};

/// Overrides every other location when set.
pub const FFMPEG_DIR_ENV: &str = "BLURLINE_FFMPEG_DIR";

/// Ordered directories checked for `ffmpeg`/`ffprobe` before `PATH`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolSearch {
    dirs: Vec<PathBuf>,
}

impl ToolSearch {
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        let mut search = Self::default();
        for dir in dirs {
            search.push(dir);
        }
        search
    }

    /// `$BLURLINE_FFMPEG_DIR`, then the directory of the running executable
    /// with its `bin/` and `../bin/`, then the working directory and its `bin/`.
    pub fn from_environment() -> Self {
        let mut search = Self::default();
        if let Some(dir) = env::var_os(FFMPEG_DIR_ENV).filter(|dir| !dir.is_empty()) {
            search.push(PathBuf::from(dir));
        }
        if let Some(exe_dir) = env::current_exe()
            .and_then(|exe| exe.canonicalize())
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
        {
            search.push(exe_dir.clone());
            search.push(exe_dir.join("bin"));
            if let Some(parent) = exe_dir.parent() {
                search.push(parent.join("bin"));
            }
        }
        if let Ok(cwd) = env::current_dir() {
            search.push(cwd.clone());
            search.push(cwd.join("bin"));
        }
        search
    }

    fn push(&mut self, dir: PathBuf) {
        if !self.dirs.contains(&dir) {
            self.dirs.push(dir);
        }
    }

    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    /// First `<dir>/<binary><EXE_SUFFIX>` that exists.
    pub fn locate(&self, binary: &str) -> Option<PathBuf> {
        let file_name = format!("{binary}{}", env::consts::EXE_SUFFIX);
        self.dirs
            .iter()
            .map(|dir| dir.join(&file_name))
            .find(|candidate| candidate.is_file())
    }
}

/// A command for `binary`, preferring a bundled copy over `PATH`.
pub fn command_for(binary: &str) -> ProcessCommand {
    match ToolSearch::from_environment().locate(binary) {
        Some(path) => ProcessCommand::new(path),
        None => ProcessCommand::new(binary),
    }
}

/// Runs `<binary> -version` and returns the first line of its banner.
pub fn tool_version(binary: &str) -> Result<String> {
    let output = command_for(binary)
        .arg("-version")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
        .with_context(|| format!("failed to execute {binary}; is FFmpeg installed?"))?;

    if !output.status.success() {
        bail!("{binary} -version exited with status {}", output.status);
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(first_banner_line(&stdout, binary))
}

fn first_banner_line(stdout: &str, binary: &str) -> String {
    stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| binary.to_string())
}

/// True when [`command_for`] would run a bundled copy rather than one from `PATH`.
pub fn is_bundled(binary: &str) -> bool {
    ToolSearch::from_environment().locate(binary).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch_tool(dir: &Path, binary: &str, contents: &[u8]) -> PathBuf {
        std::fs::create_dir_all(dir).unwrap();
        let path = dir.join(format!("{binary}{}", env::consts::EXE_SUFFIX));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn environment_search_covers_working_directory_bin() {
        let search = ToolSearch::from_environment();
        if let Ok(cwd) = env::current_dir() {
            assert!(search.dirs().contains(&cwd.join("bin")));
        }
    }

    #[test]
    fn earlier_directories_shadow_later_ones() {
        let temp = tempfile::tempdir().unwrap();
        let bundled = temp.path().join("bundle");
        let system = temp.path().join("system");
        let expected = touch_tool(&bundled, "ffprobe", b"bundled");
        touch_tool(&system, "ffprobe", b"system");

        let search = ToolSearch::new(vec![bundled, system]);
        assert_eq!(search.locate("ffprobe"), Some(expected));
    }

    #[test]
    fn directories_are_deduplicated_in_order() {
        let search = ToolSearch::new(vec!["a".into(), "b".into(), "a".into()]);
        assert_eq!(search.dirs(), [PathBuf::from("a"), PathBuf::from("b")]);
    }

    #[test]
    fn locate_ignores_directories_named_like_the_tool() {
        let temp = tempfile::tempdir().unwrap();
        let name = format!("ffmpeg{}", env::consts::EXE_SUFFIX);
        std::fs::create_dir_all(temp.path().join(name)).unwrap();

        let search = ToolSearch::new(vec![temp.path().to_path_buf()]);
        assert_eq!(search.locate("ffmpeg"), None);
        assert_eq!(search.locate("ffprobe"), None);
    }

    #[test]
    fn banner_uses_first_non_empty_line() {
        let stdout = "\nffmpeg version 7.1 Copyright (c) 2000-2024\nbuilt with gcc\n";
        assert_eq!(
            first_banner_line(stdout, "ffmpeg"),
            "ffmpeg version 7.1 Copyright (c) 2000-2024"
        );
        assert_eq!(first_banner_line("", "ffprobe"), "ffprobe");
    }
}
