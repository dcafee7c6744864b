//! Formatting and writing of decoded hypothesis rankings

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use serde::Serialize;

use crate::cipher::Clustering;

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankingFormat {
    /// One line per hypothesis: `p  pClusters  plaintext`
    Text,
    /// JSON with scores and metadata
    Json,
}

/// JSON output structure
#[derive(Debug, Serialize)]
struct JsonHypothesis {
    rank: usize,
    p: f64,
    p_clusters: f64,
    n_clusters: usize,
    text: String,
}

/// Format a hypothesis as a ranking line. Hinted positions are marked
/// (uppercase letters, `_` for space).
pub fn format_text(rank: usize, clustering: &Clustering, hint: &[i8]) -> String {
    format!(
        "{:3}: {:10.3} {:10.3}  {}",
        rank,
        clustering.p,
        clustering.p_clusters,
        clustering.decoded_marked(hint)
    )
}

/// Format a hypothesis as a JSON object
pub fn format_json(rank: usize, clustering: &Clustering, hint: &[i8]) -> String {
    let output = JsonHypothesis {
        rank,
        p: clustering.p,
        p_clusters: clustering.p_clusters,
        n_clusters: clustering.n_clusters(),
        text: clustering.decoded_marked(hint),
    };

    serde_json::to_string(&output)
        .unwrap_or_else(|_| format!("{{\"text\": \"{}\"}}", clustering.decoded_marked(hint)))
}

/// Writes a hypothesis ranking to the console and/or a file
pub struct RankingWriter {
    format: RankingFormat,
    console: bool,
    file: Option<File>,
}

impl RankingWriter {
    pub fn new(
        format: RankingFormat,
        console: bool,
        path: Option<&Path>,
    ) -> io::Result<Self> {
        let file = match path {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent)?;
                    }
                }
                Some(File::create(path)?)
            }
            None => None,
        };

        Ok(Self {
            format,
            console,
            file,
        })
    }

    /// Write the ranking, best hypothesis first
    pub fn write(&mut self, hypotheses: &[Clustering], hint: &[i8]) -> io::Result<()> {
        for (rank, clustering) in hypotheses.iter().enumerate() {
            let line = match self.format {
                RankingFormat::Text => format_text(rank, clustering, hint),
                RankingFormat::Json => format_json(rank, clustering, hint),
            };

            if self.console {
                let mut stdout = io::stdout().lock();
                writeln!(stdout, "{line}")?;
            }
            if let Some(ref mut file) = self.file {
                writeln!(file, "{line}")?;
            }
        }

        if let Some(ref mut file) = self.file {
            file.flush()?;
        }
        Ok(())
    }

}
