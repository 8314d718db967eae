use std::path::Path;

use anyhow::{Context, Result, bail};

/// Read batch targets from a `.csv` file (a `url`/`target` column, or the
/// first column) or from a plain list with one target per line. Blank lines
/// and `#` comments are skipped.
pub fn read_targets(path: &Path) -> Result<Vec<String>> {
    let is_csv = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("csv"));

    let targets = if is_csv {
        read_csv(path)?
    } else {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read target list: {}", path.display()))?;
        parse_lines(&text)
    };

    if targets.is_empty() {
        bail!("No targets found in {}", path.display());
    }
    Ok(targets)
}

fn parse_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect()
}

fn read_csv(path: &Path) -> Result<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open CSV file: {}", path.display()))?;

    let headers = reader.headers().context("Failed to read CSV header")?.clone();
    let column = headers
        .iter()
        .position(|h| h.eq_ignore_ascii_case("url") || h.eq_ignore_ascii_case("target"))
        .unwrap_or(0);

    let mut targets = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("Invalid CSV record at row {}", line + 2))?;
        if let Some(value) = record.get(column)
            && !value.is_empty()
        {
            targets.push(value.to_string());
        }
    }
    Ok(targets)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_file(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn reads_plain_list() {
        let file = write_file(
            ".txt",
            "# shops\nhttps://a.example.com\n\n  https://b.example.com  \n",
        );
        let targets = read_targets(file.path()).unwrap();
        assert_eq!(targets, vec!["https://a.example.com", "https://b.example.com"]);
    }

    #[test]
    fn reads_named_csv_column() {
        let file = write_file(
            ".csv",
            "name,url\nfirst,https://a.example.com\nsecond, https://b.example.com\nempty,\n",
        );
        let targets = read_targets(file.path()).unwrap();
        assert_eq!(targets, vec!["https://a.example.com", "https://b.example.com"]);
    }

    #[test]
    fn csv_without_url_header_uses_first_column() {
        let file = write_file(".CSV", "link,note\nhttps://a.example.com,x\n");
        let targets = read_targets(file.path()).unwrap();
        assert_eq!(targets, vec!["https://a.example.com"]);
    }

    #[test]
    fn empty_input_is_an_error() {
        let file = write_file(".txt", "# nothing here\n\n");
        assert!(read_targets(file.path()).is_err());
    }
}
