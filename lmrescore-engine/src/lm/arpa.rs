//! ARPA text format reader.
//!
//! ```text
//! \data\
//! ngram 1=3
//! ngram 2=1
//!
//! \1-grams:
//! -1.0	<s>	-0.3
//! -0.5	hello	-0.2
//! -0.8	</s>
//!
//! \2-grams:
//! -0.1	<s> hello
//!
//! \end\
//! ```

use std::collections::HashMap;
use std::io::BufRead;

use tracing::warn;

use super::error::LmError;
use super::{MAX_ORDER, UNKNOWN_TOKEN, UNKNOWN_WORD, WordIndex};

type Result<T> = super::error::Result<T>;

/// Log10 probability used for `<unk>` when the file does not list it.
const DEFAULT_UNKNOWN_PROB: f32 = -100.0;

/// Log10 probability and back-off weight of one n-gram.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NgramWeights {
    pub prob: f32,
    pub backoff: f32,
}

/// Parsed ARPA contents with words already mapped to ids.
#[derive(Debug, Default)]
pub struct ArpaData {
    pub order: usize,
    /// Token of each id; id 0 is `<unk>`
    pub vocab: Vec<String>,
    /// N-grams per order (index 0 holds unigrams), words oldest first
    pub ngrams: Vec<Vec<(Vec<WordIndex>, NgramWeights)>>,
}

#[derive(Clone, Copy)]
enum Section {
    Preamble,
    Data,
    Ngrams(usize),
    End,
}

fn format_error(line: usize, message: impl Into<String>) -> LmError {
    LmError::Format {
        line,
        message: message.into(),
    }
}

/// Parse `\N-grams:` into `N`.
fn parse_section_header(line: &str) -> Option<usize> {
    line.strip_prefix('\\')?.strip_suffix("-grams:")?.parse().ok()
}

/// Read an ARPA model.
pub fn parse_arpa<R: BufRead>(reader: R) -> Result<ArpaData> {
    let mut counts: Vec<usize> = Vec::new();
    let mut data = ArpaData {
        vocab: vec![UNKNOWN_TOKEN.to_string()],
        ..Default::default()
    };
    let mut ids: HashMap<String, WordIndex> = HashMap::new();
    let mut seen_unknown = false;
    let mut section = Section::Preamble;

    for (idx, line) in reader.lines().enumerate() {
        let lineno = idx + 1;
        let line = line?;
        let line = line.trim();

        match section {
            Section::Preamble => {
                if line == "\\data\\" {
                    section = Section::Data;
                }
            }
            Section::Data => {
                if line.is_empty() {
                    continue;
                }
                if let Some(rest) = line.strip_prefix("ngram ") {
                    let (n, count) = rest
                        .split_once('=')
                        .ok_or_else(|| format_error(lineno, "malformed ngram count"))?;
                    let n: usize = n
                        .trim()
                        .parse()
                        .map_err(|_| format_error(lineno, "bad ngram order"))?;
                    let count: usize = count
                        .trim()
                        .parse()
                        .map_err(|_| format_error(lineno, "bad ngram count"))?;
                    if n != counts.len() + 1 {
                        return Err(format_error(lineno, "ngram counts out of order"));
                    }
                    counts.push(count);
                } else if parse_section_header(line) == Some(1) {
                    if counts.is_empty() {
                        return Err(format_error(lineno, "no ngram counts in \\data\\"));
                    }
                    if counts.len() > MAX_ORDER {
                        return Err(LmError::OrderTooHigh(counts.len()));
                    }
                    data.order = counts.len();
                    data.ngrams = vec![Vec::new(); data.order];
                    section = Section::Ngrams(1);
                } else {
                    return Err(format_error(lineno, format!("unexpected line '{line}'")));
                }
            }
            Section::Ngrams(n) => {
                if line.is_empty() {
                    continue;
                }
                if line == "\\end\\" {
                    section = Section::End;
                    continue;
                }
                if let Some(next) = parse_section_header(line) {
                    if next != n + 1 || next > data.order {
                        return Err(format_error(lineno, format!("unexpected section {next}")));
                    }
                    section = Section::Ngrams(next);
                    continue;
                }

                let fields: Vec<&str> = line.split_whitespace().collect();
                if fields.len() != n + 1 && fields.len() != n + 2 {
                    return Err(format_error(lineno, format!("expected a {n}-gram entry")));
                }
                let prob: f32 = fields[0]
                    .parse()
                    .map_err(|_| format_error(lineno, "bad probability"))?;
                let backoff: f32 = match fields.get(n + 1) {
                    Some(b) => b
                        .parse()
                        .map_err(|_| format_error(lineno, "bad back-off weight"))?,
                    None => 0.0,
                };

                let mut words = Vec::with_capacity(n);
                for &token in &fields[1..=n] {
                    let id = if n == 1 {
                        if token == UNKNOWN_TOKEN {
                            seen_unknown = true;
                            UNKNOWN_WORD
                        } else {
                            let next_id = data.vocab.len() as WordIndex;
                            let id = *ids.entry(token.to_string()).or_insert(next_id);
                            if id == next_id {
                                data.vocab.push(token.to_string());
                            }
                            id
                        }
                    } else if token == UNKNOWN_TOKEN {
                        UNKNOWN_WORD
                    } else {
                        *ids.get(token).ok_or_else(|| {
                            format_error(lineno, format!("'{token}' has no unigram"))
                        })?
                    };
                    words.push(id);
                }
                data.ngrams[n - 1].push((words, NgramWeights { prob, backoff }));
            }
            Section::End => break,
        }
    }

    if !matches!(section, Section::End) {
        return Err(format_error(0, "missing \\end\\ marker"));
    }
    for (n, (&expected, parsed)) in counts.iter().zip(&data.ngrams).enumerate() {
        if expected != parsed.len() {
            return Err(format_error(
                0,
                format!(
                    "{}-gram count mismatch: header says {expected}, found {}",
                    n + 1,
                    parsed.len()
                ),
            ));
        }
    }
    if !seen_unknown {
        warn!("ARPA file has no {UNKNOWN_TOKEN}; using log10 probability {DEFAULT_UNKNOWN_PROB}");
        data.ngrams[0].push((
            vec![UNKNOWN_WORD],
            NgramWeights {
                prob: DEFAULT_UNKNOWN_PROB,
                backoff: 0.0,
            },
        ));
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SMALL: &str = "\\data\\
ngram 1=4
ngram 2=2

\\1-grams:
-1.0\t<s>\t-0.3
-0.5\thello\t-0.2
-0.7\tworld
-0.8\t</s>

\\2-grams:
-0.1\t<s> hello
-0.2\thello world

\\end\\
";

    #[test]
    fn test_parse_small() {
        let data = parse_arpa(SMALL.as_bytes()).unwrap();
        assert_eq!(data.order, 2);
        assert_eq!(data.vocab, vec!["<unk>", "<s>", "hello", "world", "</s>"]);
        // 4 listed unigrams plus the synthetic <unk>
        assert_eq!(data.ngrams[0].len(), 5);
        assert_eq!(data.ngrams[1].len(), 2);

        let (words, weights) = &data.ngrams[1][1];
        assert_eq!(words, &vec![2, 3]);
        assert_eq!(weights.prob, -0.2);
        assert_eq!(weights.backoff, 0.0);
    }

    #[test]
    fn test_unknown_bigram_word_is_error() {
        let text = SMALL.replace("hello world", "hello planet");
        let err = parse_arpa(text.as_bytes()).unwrap_err();
        assert!(matches!(err, LmError::Format { .. }));
    }

    #[test]
    fn test_count_mismatch_is_error() {
        let text = SMALL.replace("ngram 2=2", "ngram 2=3");
        assert!(parse_arpa(text.as_bytes()).is_err());
    }

    #[test]
    fn test_missing_end_is_error() {
        let text = SMALL.replace("\\end\\", "");
        assert!(parse_arpa(text.as_bytes()).is_err());
    }

    #[test]
    fn test_order_too_high() {
        let text = "\\data\\\nngram 1=1\nngram 2=0\nngram 3=0\nngram 4=0\nngram 5=0\nngram 6=0\n\\1-grams:\n";
        let err = parse_arpa(text.as_bytes()).unwrap_err();
        assert!(matches!(err, LmError::OrderTooHigh(6)));
    }
}
