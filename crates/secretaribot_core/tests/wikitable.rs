use secretaribot_core::wikitable::{Row, TableError, WikiTable};

const SINGLE_ROW: &str = "{| class=\"wikitable\"
|-
! URL
! Etag
! Last Modified
|-
| http://example.org/a
| foo
| bar
|}";

const HAND_WRITTEN: &str = "Links we keep an eye on:

{| class=\"wikitable sortable\"
|-
!URL
!   Etag
! Last Modified
|-
|http://example.org/a
|  \"a1\"
| Mon, 05 Jan 2026 10:00:00 GMT
|-
| https://noisebridge.net/
|
| Unknown
|-
| file:///srv/www/index.html
|}
[[Category:Secretaribot]]";

fn row(pairs: &[(&str, &str)]) -> Row {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

#[test]
fn literal_table_decodes_and_reencodes_exactly() {
    let table = WikiTable::decode(SINGLE_ROW).expect("decode");
    assert_eq!(table.header(), "{| class=\"wikitable\"");
    assert_eq!(table.fields(), ["url", "etag", "last-modified"]);
    assert_eq!(table.labels(), ["URL", "Etag", "Last Modified"]);
    assert_eq!(
        table.rows(),
        [row(&[
            ("url", "http://example.org/a"),
            ("etag", "foo"),
            ("last-modified", "bar"),
        ])]
    );
    assert_eq!(table.encode(), SINGLE_ROW);
}

#[test]
fn encoding_is_idempotent_for_hand_written_markup() {
    let first = WikiTable::decode(HAND_WRITTEN).expect("decode");
    let encoded = first.encode();
    let second = WikiTable::decode(&encoded).expect("decode encoded");
    assert_eq!(second, first);
    assert_eq!(second.encode(), encoded);
}

#[test]
fn fields_and_labels_pair_up_in_column_order() {
    let table: WikiTable = HAND_WRITTEN.parse().expect("decode");
    assert_eq!(table.fields().len(), table.labels().len());
    assert_eq!(table.fields(), ["url", "etag", "last-modified"]);
    assert_eq!(table.labels(), ["URL", "Etag", "Last Modified"]);
}

#[test]
fn rows_only_use_declared_fields() {
    let table = WikiTable::decode(HAND_WRITTEN).expect("decode");
    assert_eq!(table.rows().len(), 3);
    for row in table.rows() {
        for key in row.keys() {
            assert!(table.has_field(key), "unexpected key {key}");
        }
    }
    assert_eq!(table.rows()[1].get("etag").map(String::as_str), Some(""));
    assert_eq!(
        table.rows()[2],
        row(&[("url", "file:///srv/www/index.html")])
    );
}

#[test]
fn replacing_rows_leaves_the_source_table_alone() {
    let table = WikiTable::decode(SINGLE_ROW).expect("decode");
    let mut rows = table.rows().to_vec();
    rows[0].insert("url".to_string(), "blah".to_string());

    let replaced = table.with_rows(rows.clone()).expect("replace");
    assert_eq!(replaced.rows(), rows.as_slice());
    assert_eq!(
        table.rows()[0].get("url").map(String::as_str),
        Some("http://example.org/a")
    );

    let before = table.encode();
    let after = replaced.encode();
    let changed = before
        .lines()
        .zip(after.lines())
        .filter(|(old, new)| old != new)
        .collect::<Vec<_>>();
    assert_eq!(before.lines().count(), after.lines().count());
    assert_eq!(changed, [("| http://example.org/a", "| blah")]);
}

#[test]
fn identical_rows_encode_identically() {
    let table = WikiTable::decode(HAND_WRITTEN).expect("decode");
    let same = table.with_rows(table.rows().to_vec()).expect("replace");
    assert_eq!(same.encode(), table.encode());
}

#[test]
fn foreign_keys_are_rejected_as_schema_mismatch() {
    let table = WikiTable::decode(SINGLE_ROW).expect("decode");
    let error = table
        .with_rows(vec![row(&[("url", "x"), ("owner", "me")])])
        .expect_err("schema mismatch");
    assert_eq!(
        error,
        TableError::SchemaMismatch {
            row: 0,
            key: "owner".to_string()
        }
    );
    assert!(!error.is_malformed_markup());
}

#[test]
fn unclosed_markup_is_malformed() {
    let error = WikiTable::decode("{|\n|-\n! URL\n|-\n| a").expect_err("malformed");
    assert_eq!(error, TableError::MissingClose);
    assert!(error.is_malformed_markup());
}
