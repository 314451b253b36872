//! XML payloads addressed with XPath.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use sxd_document::parser as xml_parser;
use sxd_xpath::{Context, Factory, Value};

use crate::error::ParseError;
use crate::params::Mappings;
use crate::table::{Table, TableBuilder};

use super::Parser;

/// Evaluates each external field as an XPath expression.
///
/// A default namespace declaration (`xmlns="..."`) is rewritten to a plain
/// `ns` attribute before parsing, so that unprefixed paths keep matching
/// unprefixed elements. Prefixes used by a path are registered before
/// evaluation: with the URI the document declares for them, or with a
/// placeholder when it declares none.
///
/// Several rules may feed one column. Their values are appended in rule
/// order, and each rule contributes its matches in document order.
#[derive(Debug, Default, Clone, Copy)]
pub struct XmlParser;

impl Parser for XmlParser {
    fn parse(&self, text: &str, rules: &Mappings, initial: &Table) -> Result<Table, ParseError> {
        let text = neutralize_default_namespace(text);
        let package = xml_parser::parse(&text)
            .map_err(|error| ParseError::InvalidXml(format!("{error:?}")))?;
        let document = package.as_document();
        let declared = declared_namespaces(&text);

        let mut builder = TableBuilder::with_initial(initial);
        let mut evaluated: BTreeMap<&str, Vec<String>> = BTreeMap::new();

        for mapping in rules {
            let values = match evaluated.get(mapping.external.as_str()) {
                Some(values) => values.clone(),
                None => {
                    let values = evaluate(&document, &mapping.external, &declared)?;
                    evaluated.insert(mapping.external.as_str(), values.clone());
                    values
                }
            };
            builder.append(&mapping.column, values);
        }

        Ok(builder.finish())
    }
}

fn evaluate(
    document: &sxd_document::dom::Document<'_>,
    path: &str,
    declared: &BTreeMap<String, String>,
) -> Result<Vec<String>, ParseError> {
    let invalid = |cause: String| ParseError::InvalidXpath {
        path: path.to_owned(),
        cause,
    };

    let xpath = Factory::new()
        .build(path)
        .map_err(|error| invalid(format!("{error:?}")))?
        .ok_or_else(|| invalid("empty expression".into()))?;

    let mut context = Context::new();
    for prefix in path_prefixes(path) {
        let uri = declared
            .get(&prefix)
            .cloned()
            .unwrap_or_else(|| format!("urn:extdata:unbound:{prefix}"));
        context.set_namespace(&prefix, &uri);
    }

    let value = xpath
        .evaluate(&context, document.root())
        .map_err(|error| invalid(format!("{error:?}")))?;

    let values = match value {
        Value::Nodeset(nodes) => nodes
            .document_order()
            .into_iter()
            .map(|node| node.string_value())
            .filter(|text| !text.trim().is_empty())
            .collect(),
        other => {
            let text = other.string();
            if text.trim().is_empty() {
                Vec::new()
            } else {
                vec![text]
            }
        }
    };
    Ok(values)
}

fn neutralize_default_namespace(text: &str) -> String {
    static DEFAULT_NS: OnceLock<Option<Regex>> = OnceLock::new();
    match DEFAULT_NS.get_or_init(|| Regex::new(r"\bxmlns\s*=").ok()) {
        Some(pattern) => pattern.replace_all(text, "ns=").into_owned(),
        None => text.to_owned(),
    }
}

fn declared_namespaces(text: &str) -> BTreeMap<String, String> {
    static DECLARATION: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(pattern) = DECLARATION
        .get_or_init(|| Regex::new(r#"xmlns:([A-Za-z_][\w.\-]*)\s*=\s*["']([^"']*)["']"#).ok())
    else {
        return BTreeMap::new();
    };

    let mut declared = BTreeMap::new();
    for captures in pattern.captures_iter(text) {
        declared
            .entry(captures[1].to_owned())
            .or_insert_with(|| captures[2].to_owned());
    }
    declared
}

/// Prefixes appearing as `/prefix:` or `@prefix:` in a path.
fn path_prefixes(path: &str) -> Vec<String> {
    static PREFIX: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(pattern) = PREFIX.get_or_init(|| Regex::new(r"[/@]([A-Za-z0-9_]+):[^:]").ok()) else {
        return Vec::new();
    };

    let mut prefixes: Vec<String> = pattern
        .captures_iter(path)
        .map(|captures| captures[1].to_owned())
        .collect();
    prefixes.sort();
    prefixes.dedup();
    prefixes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(xml: &str, rules: &str) -> Result<Table, ParseError> {
        XmlParser.parse(xml, &Mappings::parse(rules), &Table::new())
    }

    #[test]
    fn skips_whitespace_only_nodes_and_keeps_document_order() {
        let xml = "<list><i>one</i><i>  </i><i>two</i><i>three</i></list>";
        let table = parse(xml, "item=//i").expect("parse");
        assert_eq!(
            table.column("item"),
            Some(&["one".to_string(), "two".to_string(), "three".to_string()][..])
        );
    }

    #[test]
    fn default_namespace_does_not_hide_elements() {
        let xml = r#"<feed xmlns="http://www.w3.org/2005/Atom"><title>News</title></feed>"#;
        let table = parse(xml, "title=/feed/title").expect("parse");
        assert_eq!(table.value("title", 0), Some("News"));
    }

    #[test]
    fn declared_prefixes_are_registered() {
        let xml = r#"<root xmlns:dc="http://purl.org/dc/elements/1.1/"><dc:creator>Ada</dc:creator></root>"#;
        let table = parse(xml, "author=//dc:creator").expect("parse");
        assert_eq!(table.value("author", 0), Some("Ada"));
    }

    #[test]
    fn undeclared_prefix_yields_no_values_instead_of_failing() {
        let table = parse("<root><a>1</a></root>", "x=//zz:a").expect("parse");
        assert_eq!(table.column("x"), Some(&[][..]));
    }

    #[test]
    fn attributes_and_same_path_twice() {
        let xml = r#"<r><p id="7">x</p></r>"#;
        let table = parse(xml, "id=//p/@id, again=//p/@id").expect("parse");
        assert_eq!(table.value("id", 0), Some("7"));
        assert_eq!(table.value("again", 0), Some("7"));
    }

    #[test]
    fn rules_sharing_a_column_append_in_rule_order() {
        let xml = "<r><a>1</a><b>2</b><a>3</a></r>";
        let table = parse(xml, "item=//b, item=//a").expect("parse");
        assert_eq!(
            table.column("item"),
            Some(&["2".to_string(), "1".to_string(), "3".to_string()][..])
        );
    }

    #[test]
    fn appends_when_column_already_has_values() {
        let initial = Table::from_columns([("item", vec!["zero".to_string()])]).expect("table");
        let table = XmlParser
            .parse("<l><i>one</i></l>", &Mappings::parse("item=//i"), &initial)
            .expect("parse");
        assert_eq!(
            table.column("item"),
            Some(&["zero".to_string(), "one".to_string()][..])
        );
    }

    #[test]
    fn malformed_document_is_a_decode_error() {
        assert!(matches!(
            parse("<open>", "a=//a"),
            Err(ParseError::InvalidXml(_))
        ));
    }

    #[test]
    fn malformed_path_is_reported_with_the_path() {
        match parse("<a/>", "x=//[") {
            Err(ParseError::InvalidXpath { path, .. }) => assert_eq!(path, "//["),
            other => panic!("unexpected {other:?}"),
        }
    }
}
