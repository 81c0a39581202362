use std::{
    fmt,
    fs::File,
    io::{self, BufWriter, Write},
    path::Path,
    str::FromStr,
};

use docx_rs::{Docx, Paragraph, Run, Style, StyleType};
use tracing::info;

use crate::error::{Error, Result};
use crate::runner::ResponsePair;

pub const DOCUMENT_TITLE: &str = "Prompt Responses";

/// Serialization targets for a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Docx,
    Txt,
    Md,
    Stdout,
}

impl OutputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Docx => "docx",
            OutputFormat::Txt => "txt",
            OutputFormat::Md => "md",
            OutputFormat::Stdout => "stdout",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "docx" => Ok(OutputFormat::Docx),
            "txt" => Ok(OutputFormat::Txt),
            "md" => Ok(OutputFormat::Md),
            "stdout" => Ok(OutputFormat::Stdout),
            other => Err(Error::UnknownFormat(other.to_string())),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Writes `pairs` to `destination` in `format`. `destination` is ignored for stdout.
pub fn write_pairs(pairs: &[ResponsePair], destination: &Path, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Docx => {
            info!("Saving responses to {} in DOCX format", destination.display());
            write_docx(pairs, destination)
        }
        OutputFormat::Txt => {
            info!("Saving responses to {} in TXT format", destination.display());
            write_file(destination, &render_text(pairs))
        }
        OutputFormat::Md => {
            info!(
                "Saving responses to {} in Markdown format",
                destination.display()
            );
            write_file(destination, &render_markdown(pairs))
        }
        OutputFormat::Stdout => {
            info!("Printing responses to stdout");
            let mut stdout = io::stdout().lock();
            stdout
                .write_all(render_console(pairs).as_bytes())
                .and_then(|_| stdout.flush())
                .map_err(|err| Error::Write {
                    path: "<stdout>".into(),
                    details: err.to_string(),
                })
        }
    }
}

pub fn render_text(pairs: &[ResponsePair]) -> String {
    pairs
        .iter()
        .map(|pair| format!("Prompt: {}\nResponse: {}\n\n", pair.prompt, pair.response))
        .collect()
}

pub fn render_markdown(pairs: &[ResponsePair]) -> String {
    pairs
        .iter()
        .map(|pair| {
            format!(
                "## Prompt\n{}\n\n### Response\n{}\n\n",
                pair.prompt, pair.response
            )
        })
        .collect()
}

pub fn render_console(pairs: &[ResponsePair]) -> String {
    pairs
        .iter()
        .map(|pair| format!("## Prompt: {}\n## Response: {}\n\n", pair.prompt, pair.response))
        .collect()
}

/// Title, then a heading per prompt followed by one paragraph per response line.
pub fn build_document(pairs: &[ResponsePair]) -> Docx {
    let mut doc = Docx::new()
        .add_style(
            Style::new("Title", StyleType::Paragraph)
                .name("Title")
                .size(40)
                .bold(),
        )
        .add_style(
            Style::new("Heading1", StyleType::Paragraph)
                .name("Heading 1")
                .size(28)
                .bold(),
        )
        .add_paragraph(
            Paragraph::new()
                .style("Title")
                .add_run(Run::new().add_text(DOCUMENT_TITLE)),
        );

    for pair in pairs {
        doc = doc.add_paragraph(
            Paragraph::new()
                .style("Heading1")
                .add_run(Run::new().add_text(pair.prompt.as_str())),
        );
        for line in pair.response.lines() {
            doc = doc.add_paragraph(Paragraph::new().add_run(Run::new().add_text(line)));
        }
    }
    doc
}

fn write_docx(pairs: &[ResponsePair], destination: &Path) -> Result<()> {
    let file = create(destination)?;
    build_document(pairs)
        .build()
        .pack(file)
        .map_err(|err| write_error(destination, err))
}

fn write_file(destination: &Path, contents: &str) -> Result<()> {
    let mut writer = BufWriter::new(create(destination)?);
    writer
        .write_all(contents.as_bytes())
        .and_then(|_| writer.flush())
        .map_err(|err| write_error(destination, err))
}

fn create(destination: &Path) -> Result<File> {
    File::create(destination).map_err(|err| write_error(destination, err))
}

fn write_error(destination: &Path, err: impl fmt::Display) -> Error {
    Error::Write {
        path: destination.display().to_string(),
        details: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn pair(prompt: &str, response: &str) -> ResponsePair {
        ResponsePair {
            prompt: prompt.into(),
            response: response.into(),
        }
    }

    fn sample_pairs() -> Vec<ResponsePair> {
        vec![pair("What is 2+2?", "4"), pair("Name a color", "Blue")]
    }

    #[test]
    fn markdown_blocks_follow_pair_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.md");

        write_pairs(&sample_pairs(), &path, OutputFormat::Md).unwrap();

        let written = fs::read_to_string(&path).unwrap();
        assert_eq!(
            written,
            "## Prompt\nWhat is 2+2?\n\n### Response\n4\n\n## Prompt\nName a color\n\n### Response\nBlue\n\n"
        );
    }

    #[test]
    fn text_output_overwrites_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        fs::write(&path, "stale content that should disappear").unwrap();

        write_pairs(&sample_pairs(), &path, OutputFormat::Txt).unwrap();

        let written = fs::read_to_string(&path).unwrap();
        assert_eq!(
            written,
            "Prompt: What is 2+2?\nResponse: 4\n\nPrompt: Name a color\nResponse: Blue\n\n"
        );
    }

    #[test]
    fn text_round_trips_through_delimiters() {
        let pairs = vec![pair("Ünïcode ✓", "multi\nline"), pair("x", "y: z")];
        let rendered = render_text(&pairs);

        let recovered: Vec<ResponsePair> = rendered
            .strip_suffix("\n\n")
            .unwrap()
            .split("\n\nPrompt: ")
            .map(|block| {
                let block = block.strip_prefix("Prompt: ").unwrap_or(block);
                let (prompt, response) = block.split_once("\nResponse: ").unwrap();
                pair(prompt, response)
            })
            .collect();
        assert_eq!(recovered, pairs);
    }

    #[test]
    fn markdown_round_trips_through_delimiters() {
        let pairs = vec![pair("Tabs\tand ünicode", "- a\n- b"), pair("q", "r")];
        let rendered = render_markdown(&pairs);

        let recovered: Vec<ResponsePair> = rendered
            .split("## Prompt\n")
            .filter(|block| !block.is_empty())
            .map(|block| {
                let block = block.strip_suffix("\n\n").unwrap();
                let (prompt, response) = block.split_once("\n\n### Response\n").unwrap();
                pair(prompt, response)
            })
            .collect();
        assert_eq!(recovered, pairs);
    }

    #[test]
    fn console_rendering_uses_inline_headers() {
        assert_eq!(
            render_console(&sample_pairs()[..1]),
            "## Prompt: What is 2+2?\n## Response: 4\n\n"
        );
    }

    #[test]
    fn docx_output_is_a_zip_package() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.docx");

        write_pairs(&sample_pairs(), &path, OutputFormat::Docx).unwrap();

        let bytes = fs::read(&path).unwrap();
        assert!(bytes.starts_with(b"PK"));
    }

    #[test]
    fn docx_paragraphs_follow_pair_order() {
        let pairs = vec![
            pair("First question", "Alpha line\nBeta line"),
            pair("Second question", "Gamma line"),
        ];
        let json = build_document(&pairs).json();

        let positions: Vec<usize> = [
            DOCUMENT_TITLE,
            "First question",
            "Alpha line",
            "Beta line",
            "Second question",
            "Gamma line",
        ]
        .iter()
        .map(|text| {
            json.find(&format!("\"{text}\""))
                .unwrap_or_else(|| panic!("{text} missing from document"))
        })
        .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]), "{positions:?}");
    }

    #[test]
    fn unknown_format_is_rejected_at_parse_time() {
        let err = "pdf".parse::<OutputFormat>().unwrap_err();
        assert!(matches!(err, Error::UnknownFormat(ref value) if value == "pdf"));
        assert_eq!("md".parse::<OutputFormat>().unwrap(), OutputFormat::Md);
    }

    #[test]
    fn unwritable_destination_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing-dir").join("out.txt");

        let err = write_pairs(&sample_pairs(), &path, OutputFormat::Txt).unwrap_err();
        assert!(matches!(err, Error::Write { .. }));
        assert!(err.to_string().contains("out.txt"));
    }
}
