//! Small text-formatting helpers shared by prompts, tool results, and
//! outputs.

use std::collections::BTreeMap;

/// Render items as a dashed list, one per line.
pub fn format_list<I, S>(items: I, indent: usize) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let pad = " ".repeat(indent);
    items
        .into_iter()
        .map(|item| format!("{pad}- {}", item.as_ref()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render items as a 1-based numbered list.
pub fn format_enumerate<I, S>(items: I, indent: usize) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let pad = " ".repeat(indent);
    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| format!("{pad}{}. {}", i + 1, item.as_ref()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render notes, falling back to a placeholder when there are none.
pub fn format_notes(notes: &[String], indent: usize, enumerated: bool) -> String {
    if notes.is_empty() {
        format!("{}No notes available", " ".repeat(indent))
    } else if enumerated {
        format_enumerate(notes, indent)
    } else {
        format_list(notes, indent)
    }
}

/// Render the merged prefix table shown in the system prompt.
pub fn format_prefixes(prefixes: &BTreeMap<String, String>) -> String {
    if prefixes.is_empty() {
        return "No prefixes available".into();
    }
    format_list(
        prefixes
            .iter()
            .map(|(short, long)| format!("{short}: {long}")),
        0,
    )
}

/// Clip a string to `max_len` characters by cutting out the middle.
pub fn clip(s: &str, max_len: usize) -> String {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() <= max_len + 3 {
        return s.to_string();
    }

    let half = max_len / 2;
    let first: String = chars[..half].iter().collect();
    let last: String = chars[chars.len() - half..].iter().collect();
    format!("{first}...{last}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_and_enumerate() {
        let items = ["a", "b"];
        assert_eq!(format_list(items, 0), "- a\n- b");
        assert_eq!(format_enumerate(items, 2), "  1. a\n  2. b");
    }

    #[test]
    fn notes_placeholder() {
        assert_eq!(format_notes(&[], 2, false), "  No notes available");
        let notes = vec!["first".to_string()];
        assert_eq!(format_notes(&notes, 0, true), "1. first");
    }

    #[test]
    fn prefixes_sorted_by_key() {
        let mut prefixes = BTreeMap::new();
        prefixes.insert("wdt".to_string(), "<http://wdt/>".to_string());
        prefixes.insert("rdfs".to_string(), "<http://rdfs/>".to_string());
        let fmt = format_prefixes(&prefixes);
        assert_eq!(fmt, "- rdfs: <http://rdfs/>\n- wdt: <http://wdt/>");
    }

    #[test]
    fn clip_cuts_middle() {
        assert_eq!(clip("short", 10), "short");
        let clipped = clip(&"x".repeat(100), 10);
        assert_eq!(clipped, format!("{}...{}", "x".repeat(5), "x".repeat(5)));
    }
}
