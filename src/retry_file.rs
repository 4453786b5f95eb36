use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::Path;

use anyhow::Context as _;

/// Read the queued URLs without touching the file.
pub fn peek(path: &Path) -> anyhow::Result<Vec<String>> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(err).with_context(|| format!("read retry file: {}", path.display()));
        }
    };
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect())
}

/// Read the queued URLs and truncate the file, so this run's failures start from empty.
pub fn drain(path: &Path) -> anyhow::Result<Vec<String>> {
    let urls = peek(path)?;
    std::fs::write(path, b"")
        .with_context(|| format!("truncate retry file: {}", path.display()))?;
    Ok(urls)
}

/// Replace the file contents with `urls`, one per line.
pub fn overwrite<'a>(path: &Path, urls: impl IntoIterator<Item = &'a str>) -> anyhow::Result<()> {
    let mut contents = String::new();
    for url in urls {
        contents.push_str(url);
        contents.push('\n');
    }
    std::fs::write(path, contents)
        .with_context(|| format!("write retry file: {}", path.display()))
}

pub fn append(path: &Path, url: &str) -> anyhow::Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open retry file: {}", path.display()))?;
    writeln!(file, "{url}").with_context(|| format!("append to retry file: {}", path.display()))?;
    file.flush()
        .with_context(|| format!("flush retry file: {}", path.display()))
}
