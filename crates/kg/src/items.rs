//! Lightweight extraction of the entities and properties a SPARQL query
//! mentions. This stands in for a full parser: full IRIs in angle brackets
//! and prefixed names with a known prefix are collected in order of first
//! appearance.

use std::collections::BTreeMap;

use regex::Regex;

/// IRIs and prefixed names used in `sparql`, deduplicated, in order.
/// `prefixes` filters prefixed names so that keywords like `rdf:type` in
/// string literals of unknown vocabularies are not picked up.
pub fn sparql_items(sparql: &str, prefixes: &BTreeMap<String, String>) -> Vec<String> {
    // compiled per call; queries are small and calls are infrequent
    let full_iri = Regex::new(r"<([^<>\s]+)>").expect("static regex");
    let prefixed = Regex::new(r"\b([A-Za-z][\w\-]*):([A-Za-z0-9_][\w\-.]*)").expect("static regex");

    let mut items = Vec::new();
    let mut push = |item: String| {
        if !items.contains(&item) {
            items.push(item);
        }
    };

    for capture in full_iri.captures_iter(sparql) {
        let iri = &capture[1];
        // schema-only matches like <http://…#> carry no item
        if iri.contains("://") {
            push(format!("<{iri}>"));
        }
    }

    for capture in prefixed.captures_iter(sparql) {
        let prefix = &capture[1];
        if prefixes.contains_key(prefix) {
            push(capture[0].to_string());
        }
    }

    items
}

/// Expand a prefixed name to its full IRI using the prefix table. Full IRIs,
/// bracketed or bare, pass through.
pub fn expand(item: &str, prefixes: &BTreeMap<String, String>) -> Option<String> {
    if let Some(bare) = item.strip_prefix('<').and_then(|s| s.strip_suffix('>')) {
        return Some(bare.to_string());
    }
    if item.contains("://") {
        return Some(item.to_string());
    }
    let (prefix, local) = item.split_once(':')?;
    let base = prefixes.get(prefix)?;
    Some(format!("{base}{local}"))
}

/// Shorten a full IRI to its prefixed form when a prefix matches; keep the
/// longest matching prefix base.
pub fn shorten(iri: &str, prefixes: &BTreeMap<String, String>) -> String {
    let bare = iri
        .strip_prefix('<')
        .and_then(|s| s.strip_suffix('>'))
        .unwrap_or(iri);

    let mut best: Option<(&str, &str)> = None;
    for (prefix, base) in prefixes {
        if let Some(local) = bare.strip_prefix(base.as_str()) {
            if local.is_empty() || local.contains('/') || local.contains('#') {
                continue;
            }
            if best.map_or(true, |(_, b)| base.len() > b.len()) {
                best = Some((prefix, base));
            }
        }
    }

    match best {
        Some((prefix, base)) => format!("{prefix}:{}", &bare[base.len()..]),
        None => format!("<{bare}>"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wikidata_prefixes() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("wd".to_string(), "http://www.wikidata.org/entity/".to_string()),
            (
                "wdt".to_string(),
                "http://www.wikidata.org/prop/direct/".to_string(),
            ),
        ])
    }

    #[test]
    fn extracts_prefixed_and_full_iris() {
        let prefixes = wikidata_prefixes();
        let sparql = "SELECT ?x WHERE { wd:Q142 wdt:P36 ?x . ?x <http://www.w3.org/2000/01/rdf-schema#label> ?l }";
        let items = sparql_items(sparql, &prefixes);
        assert_eq!(
            items,
            vec![
                "<http://www.w3.org/2000/01/rdf-schema#label>",
                "wd:Q142",
                "wdt:P36",
            ]
        );
    }

    #[test]
    fn unknown_prefixes_are_skipped() {
        let prefixes = wikidata_prefixes();
        let items = sparql_items("SELECT ?x WHERE { ?x foo:bar wd:Q1 }", &prefixes);
        assert_eq!(items, vec!["wd:Q1"]);
    }

    #[test]
    fn expand_and_shorten_roundtrip() {
        let prefixes = wikidata_prefixes();
        let full = expand("wd:Q90", &prefixes).unwrap();
        assert_eq!(full, "http://www.wikidata.org/entity/Q90");
        assert_eq!(shorten(&full, &prefixes), "wd:Q90");
        assert_eq!(
            shorten("http://unknown.org/x", &prefixes),
            "<http://unknown.org/x>"
        );
    }

    #[test]
    fn duplicates_collapse() {
        let prefixes = wikidata_prefixes();
        let items = sparql_items("ASK { wd:Q1 wdt:P31 wd:Q1 }", &prefixes);
        assert_eq!(items, vec!["wd:Q1", "wdt:P31"]);
    }
}
