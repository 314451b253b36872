//! Contract tests shared by every payload format
//!
//! Whatever the format, decoding honours the same contract: one column per
//! mapping rule, columns padded to a common length, values appended to an
//! initial table, and failures reported as a single `decode.*` record.

use extdata_core::parser::decode;
use extdata_core::{ErrorCode, Format, Mappings, Table};

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| (*value).to_owned()).collect()
}

fn every_format() -> Vec<(Format, &'static str)> {
    vec![
        (Format::Xml, "<items><item><n>bolt</n></item><item><n>nut</n></item></items>"),
        (Format::Json, r#"{"items": [{"n": "bolt"}, {"n": "nut"}]}"#),
        (
            Format::Delimited {
                delimiter: b',',
                header: true,
            },
            "n,qty\nbolt,4\nnut,10\n",
        ),
        (
            Format::Delimited {
                delimiter: b'\t',
                header: true,
            },
            "n\tqty\nbolt\t4\nnut\t10\n",
        ),
        (Format::KeyValue, "n = bolt\nn = nut\n"),
        (
            Format::Regex {
                pattern: r"(?P<n>[a-z]+);".into(),
            },
            "bolt; nut;",
        ),
    ]
}

fn rules_for(format: &Format) -> &'static str {
    match format {
        Format::Xml => "name=//n",
        Format::Json => "name=$.items[*].n",
        _ => "name=n",
    }
}

// =============================================================================
// Shape
// =============================================================================

#[test]
fn every_format_fills_the_mapped_column_in_document_order() {
    for (format, payload) in every_format() {
        let rules = Mappings::parse(rules_for(&format));

        let table = decode(&format, payload, &rules, &Table::new())
            .unwrap_or_else(|errors| panic!("{format}: {errors:?}"));

        assert_eq!(
            table.column("name"),
            Some(strings(&["bolt", "nut"]).as_slice()),
            "{format}"
        );
    }
}

#[test]
fn a_rule_that_matches_nothing_still_yields_a_padded_column() {
    for (format, payload) in every_format() {
        let rules = Mappings::parse(&format!("{}, ghost=absent", rules_for(&format)));

        let table = decode(&format, payload, &rules, &Table::new())
            .unwrap_or_else(|errors| panic!("{format}: {errors:?}"));

        assert_eq!(table.row_count(), 2, "{format}");
        assert_eq!(table.column("ghost"), Some(strings(&["", ""]).as_slice()), "{format}");
    }
}

#[test]
fn ragged_results_are_padded_to_the_longest_column() {
    // Given: A document where one field appears twice and another once
    let payload = r#"{"parts": ["bolt", "nut"], "supplier": "acme"}"#;
    let rules = Mappings::parse("part=$.parts[*], supplier=$.supplier");

    // When: It is decoded
    let table = decode(&Format::Json, payload, &rules, &Table::new()).expect("decode");

    // Then: The short column is padded with empty strings
    assert_eq!(table.row_count(), 2);
    assert_eq!(table.column("supplier"), Some(strings(&["acme", ""]).as_slice()));
}

#[test]
fn decoded_values_are_appended_to_the_initial_table() {
    let initial = Table::from_columns([("name", strings(&["washer"]))]).expect("table");
    let rules = Mappings::parse("name=$.items[*].n");

    let table = decode(
        &Format::Json,
        r#"{"items": [{"n": "bolt"}]}"#,
        &rules,
        &initial,
    )
    .expect("decode");

    assert_eq!(table.column("name"), Some(strings(&["washer", "bolt"]).as_slice()));
}

#[test]
fn text_format_gives_every_column_the_whole_payload() {
    let rules = Mappings::parse("raw, copy=anything");

    let table = decode(&Format::Text, "  line one\nline two\n", &rules, &Table::new())
        .expect("decode");

    assert_eq!(table.value("raw", 0), Some("  line one\nline two\n"));
    assert_eq!(table.value("copy", 0), Some("  line one\nline two\n"));
}

#[test]
fn ini_sections_qualify_keys() {
    let payload = "[db]\nhost = primary\n[cache]\nhost = replica\n";
    let rules = Mappings::parse("db=db.host, any=host");

    let table = decode(&Format::KeyValue, payload, &rules, &Table::new()).expect("decode");

    assert_eq!(table.column("db"), Some(strings(&["primary", ""]).as_slice()));
    assert_eq!(table.column("any"), Some(strings(&["primary", "replica"]).as_slice()));
}

// =============================================================================
// Failures
// =============================================================================

#[test]
fn malformed_payloads_give_one_decode_record() {
    let cases = [
        (Format::Xml, "<open>", ErrorCode::InvalidXml),
        (Format::Json, "{not json", ErrorCode::InvalidJson),
    ];
    for (format, payload, code) in cases {
        let errors = decode(&format, payload, &Mappings::parse("x"), &Table::new())
            .expect_err("must fail");

        assert_eq!(errors.len(), 1, "{format}");
        assert!(errors.contains(code), "{format}: {errors:?}");
    }
}

#[test]
fn a_bad_regex_is_reported_before_any_matching() {
    let format = Format::Regex {
        pattern: "(unclosed".into(),
    };

    let errors = decode(&format, "anything", &Mappings::parse("x=1"), &Table::new())
        .expect_err("must fail");

    assert!(errors.contains(ErrorCode::InvalidRegex));
}

#[test]
fn unknown_format_names_are_rejected() {
    let error = Format::from_name("yaml", None).expect_err("unknown");
    assert!(error.to_record().is(ErrorCode::UnknownFormat));
}
