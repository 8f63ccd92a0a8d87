//! Story records extracted from bot replies.
//!
//! A full reply lists each story as a block:
//!
//! ```text
//! [Title](link) by [Author](link)
//!
//! > Summary
//!
//! ^(*Site*: ... *Words*: 12,345 ... *Status*: Complete ... *Download*: [EPUB](...))
//!
//! ---
//! ```
//!
//! A slim reply (signed with [`SLIM_SIGNATURE`]) keeps only the heading, a
//! short stats suffix and the summary. Both shapes convert into the same slim
//! record body, so re-slimming a slim reply is stable.

use std::collections::HashMap;

/// Signature that marks a reply as already slim.
pub const SLIM_SIGNATURE: &str = "slim!FanfictionBot";

const KEY_TERMINATOR: &str = ") by";
const METADATA_END: &str = "---";
const NO_DOWNLOAD: &str = "no download available)";

/// One recommended story, rendered in slim form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoryRecord {
    /// `[Title](link) by` prefix of the heading. Identifies the story.
    pub key: String,
    pub body: String,
}

impl StoryRecord {
    /// Rendered length in characters.
    pub fn len(&self) -> usize {
        self.body.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

/// Parse every story in a reply, picking the template by signature.
pub fn parse_reply(text: &str) -> Vec<StoryRecord> {
    if text.contains(SLIM_SIGNATURE) {
        parse_slim(text)
    } else {
        parse_full(text)
    }
}

/// The `[Title](link) by` prefix of a heading line, if it has one.
pub fn story_key(line: &str) -> Option<&str> {
    let start = line.find('[')?;
    let end = line.rfind(KEY_TERMINATOR)?;
    if end < start {
        return None;
    }
    Some(&line[start..end + KEY_TERMINATOR.len()])
}

/// Collapse records sharing a key. The last record wins, at the position
/// where the key first appeared.
pub fn dedupe(records: impl IntoIterator<Item = StoryRecord>) -> Vec<StoryRecord> {
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut unique: Vec<StoryRecord> = Vec::new();
    for record in records {
        match positions.get(&record.key) {
            Some(&index) => unique[index] = record,
            None => {
                positions.insert(record.key.clone(), unique.len());
                unique.push(record);
            }
        }
    }
    unique
}

fn is_heading(line: &str) -> bool {
    let trimmed = line.trim_start();
    !trimmed.starts_with('>') && !trimmed.starts_with('^') && story_key(trimmed).is_some()
}

fn quoted(line: &str) -> bool {
    line.trim_start().starts_with('>')
}

enum Block {
    Seeking,
    Heading(String),
    Summary { heading: String, summary: String },
    Metadata { heading: String, summary: String, metadata: String },
}

impl Block {
    /// Where to go on a line that does not continue the current block.
    fn restart(line: &str) -> Self {
        if is_heading(line) {
            Block::Heading(line.trim().to_string())
        } else {
            Block::Seeking
        }
    }
}

fn parse_full(text: &str) -> Vec<StoryRecord> {
    let mut records = Vec::new();
    let mut block = Block::Seeking;

    for line in text.lines() {
        block = match block {
            Block::Seeking => Block::restart(line),
            Block::Heading(heading) => {
                if line.trim().is_empty() {
                    Block::Heading(heading)
                } else if quoted(line) {
                    Block::Summary {
                        heading,
                        summary: line.trim().to_string(),
                    }
                } else {
                    Block::restart(line)
                }
            }
            Block::Summary { heading, mut summary } => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    Block::Summary { heading, summary }
                } else if quoted(line) {
                    summary.push('\n');
                    summary.push_str(trimmed);
                    Block::Summary { heading, summary }
                } else if trimmed.starts_with('^') {
                    Block::Metadata {
                        heading,
                        summary,
                        metadata: String::new(),
                    }
                    .extend(trimmed, &mut records)
                } else {
                    Block::restart(line)
                }
            }
            metadata @ Block::Metadata { .. } => metadata.extend(line.trim(), &mut records),
        };
    }

    records
}

impl Block {
    /// Append a metadata line, emitting the record once the block terminator shows up.
    fn extend(self, line: &str, records: &mut Vec<StoryRecord>) -> Self {
        let Block::Metadata {
            heading,
            summary,
            mut metadata,
        } = self
        else {
            return self;
        };

        match line.find(METADATA_END) {
            Some(end) => {
                metadata.push_str(&line[..end]);
                if let Some(record) = slim_from_full(&heading, &summary, &metadata) {
                    records.push(record);
                }
                Block::Seeking
            }
            None => {
                if !metadata.is_empty() {
                    metadata.push('\n');
                }
                metadata.push_str(line);
                Block::Metadata {
                    heading,
                    summary,
                    metadata,
                }
            }
        }
    }
}

fn parse_slim(text: &str) -> Vec<StoryRecord> {
    let mut records = Vec::new();
    let mut block = Block::Seeking;

    for line in text.lines() {
        block = match block {
            Block::Seeking => Block::restart(line),
            Block::Heading(heading) => {
                if line.trim().is_empty() {
                    Block::Heading(heading)
                } else if quoted(line) {
                    Block::Summary {
                        heading,
                        summary: line.trim().to_string(),
                    }
                } else {
                    Block::restart(line)
                }
            }
            Block::Summary { heading, summary } => {
                if quoted(line) {
                    let mut summary = summary;
                    summary.push('\n');
                    summary.push_str(line.trim());
                    Block::Summary { heading, summary }
                } else {
                    records.extend(slim_record(&heading, &summary));
                    Block::restart(line)
                }
            }
            Block::Metadata { .. } => Block::restart(line),
        };
    }

    if let Block::Summary { heading, summary } = block {
        records.extend(slim_record(&heading, &summary));
    }

    records
}

fn slim_record(heading: &str, summary: &str) -> Option<StoryRecord> {
    let key = story_key(heading)?.to_string();
    Some(StoryRecord {
        key,
        body: format!("\n\n{heading}\n\n{summary}\n\n"),
    })
}

fn slim_from_full(heading: &str, summary: &str, metadata: &str) -> Option<StoryRecord> {
    let words = word_count(metadata).unwrap_or("unknown");
    let complete = if metadata.contains("*Status*: Complete") {
        ", complete"
    } else {
        ""
    };
    let download = metadata
        .find("*Download*")
        .map(|start| metadata[start..].trim_end())
        .filter(|download| !download.is_empty())
        .unwrap_or(NO_DOWNLOAD);

    slim_record(
        &format!("{heading} ({words} words{complete}; {download}"),
        summary,
    )
}

/// Digits (with thousands separators) following the first `Word` label.
fn word_count(metadata: &str) -> Option<&str> {
    let label = metadata.find("Word")?;
    let rest = &metadata[label..];
    let start = rest.find(|c: char| c.is_ascii_digit())?;
    let digits = &rest[start..];
    let end = digits
        .find(|c: char| !(c.is_ascii_digit() || c == ','))
        .unwrap_or(digits.len());
    Some(digits[..end].trim_end_matches(','))
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    const FULL_REPLY: &str = indoc! {r#"
        [Methods of Rationality](https://fanfiction.net/s/5782108/1/) by [Less Wrong](https://fanfiction.net/u/2269863/)

        > Petunia married a biochemist, and Harry grew up reading science.

        ^(*Site*: fanfiction.net ^*|* *Words*: 661,619 ^*|* *Status*: Complete ^*|* *Download*: [EPUB](https://ff2ebook.com/e/1) ^*or* [MOBI](https://ff2ebook.com/m/1))

        ---

        [The Arithmancer](https://fanfiction.net/s/10070079/1/) by [White Squirrel](https://fanfiction.net/u/5339762/)

        > Hermione grows up as a maths whiz.

        ^(*Site*: fanfiction.net ^*|* *Words*: 545,248)

        ---

        **FanfictionBot** | [Usage](https://example.invalid)
    "#};

    #[test]
    fn story_key_spans_title_link_and_by() {
        assert_eq!(
            story_key("[Title](https://x/1) by [Author](https://x/u)"),
            Some("[Title](https://x/1) by")
        );
        assert_eq!(story_key("no brackets by anyone"), None);
        assert_eq!(story_key(") by [later]"), None);
    }

    #[test]
    fn parses_full_reply_into_slim_records() {
        let records = parse_reply(FULL_REPLY);
        assert_eq!(records.len(), 2);

        assert_eq!(
            records[0].key,
            "[Methods of Rationality](https://fanfiction.net/s/5782108/1/) by"
        );
        assert!(records[0].body.starts_with("\n\n[Methods of Rationality]"));
        assert!(records[0].body.contains("(661,619 words, complete; *Download*: [EPUB]"));
        assert!(records[0].body.contains("> Petunia married a biochemist"));
        assert!(!records[0].body.contains("---"));

        assert!(records[1].body.contains("(545,248 words; no download available)"));
        assert!(records[1].body.ends_with("> Hermione grows up as a maths whiz.\n\n"));
    }

    #[test]
    fn blocks_without_terminator_are_dropped() {
        let text = indoc! {"
            [Title](l) by [Author](a)

            > summary

            ^(*Words*: 10)
        "};
        assert!(parse_reply(text).is_empty());
    }

    #[test]
    fn slim_reply_reparses_to_identical_records() {
        let records = parse_reply(FULL_REPLY);
        let mut slim_text: String = records.iter().map(|record| record.body.as_str()).collect();
        slim_text.push_str("\n\n---\n\n*slim!FanfictionBot*^(1.4.0).");

        let reparsed = parse_reply(&slim_text);
        assert_eq!(reparsed, records);
    }

    #[test]
    fn dedupe_keeps_last_body_at_first_position() {
        let record = |key: &str, body: &str| StoryRecord {
            key: key.into(),
            body: body.into(),
        };
        let unique = dedupe([
            record("[A](a) by", "old a"),
            record("[B](b) by", "b"),
            record("[A](a) by", "new a"),
        ]);
        assert_eq!(unique, [record("[A](a) by", "new a"), record("[B](b) by", "b")]);
    }

    #[test]
    fn word_count_reads_separated_digits() {
        assert_eq!(word_count("*Chapters*: 3 ^*|* *Words*: 12,345 ^*|*"), Some("12,345"));
        assert_eq!(word_count("*Chapters*: 3"), None);
    }
}
