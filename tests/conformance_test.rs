mod common;

use std::sync::Arc;

use as4_validate::document;
use as4_validate::namespace::EBMS_NS;
use as4_validate::{ConformanceCode, ConformanceError, ConformanceRuleEngine, NamespaceRegistry};
use common::TestFixtures;

fn check_fixture(name: &str) -> Result<(), ConformanceError> {
    let xml = TestFixtures::new().message(name);
    let doc = document::parse(&xml).unwrap();
    let receipt = document::first_descendant(doc.root_element(), EBMS_NS, "Receipt");

    ConformanceRuleEngine::new(Arc::new(NamespaceRegistry::as4())).validate(receipt)
}

#[test]
fn test_fixture_verdicts() {
    assert_eq!(check_fixture("valid_receipt.xml"), Ok(()));

    let cases = [
        (
            "receipt_missing_nri.xml",
            ConformanceCode::MissingNonRepudiationInformation,
        ),
        (
            "receipt_with_identifier.xml",
            ConformanceCode::ReferenceWithMessagePartIdentifier,
        ),
        ("user_message.xml", ConformanceCode::ReceiptAbsent),
    ];

    for (name, expected) in cases {
        let err = check_fixture(name).unwrap_err();
        assert_eq!(err.code, expected, "{}", name);
    }
}

#[test]
fn test_rules_do_not_depend_on_schema_validity() {
    // The timestamp is not a dateTime, but the receipt content itself conforms
    assert_eq!(check_fixture("receipt_invalid_timestamp.xml"), Ok(()));
}

#[test]
fn test_engine_reads_namespaces_from_the_registry() {
    let registry = NamespaceRegistry::new([
        ("eb", EBMS_NS),
        ("ebbp", "urn:example:signals"),
        ("ds", "urn:example:dsig"),
    ]);
    let engine = ConformanceRuleEngine::new(Arc::new(registry));

    let xml = r##"<eb:Receipt xmlns:eb="http://docs.oasis-open.org/ebxml-msg/ebms/v3.0/ns/core/200704/"
    xmlns:s="urn:example:signals" xmlns:d="urn:example:dsig">
  <s:NonRepudiationInformation>
    <s:MessagePartNRInformation><d:Reference URI="#a"/></s:MessagePartNRInformation>
  </s:NonRepudiationInformation>
</eb:Receipt>"##;
    let doc = document::parse(xml).unwrap();
    assert_eq!(engine.validate(Some(doc.root_element())), Ok(()));

    let fixture = TestFixtures::new().message("valid_receipt.xml");
    let doc = document::parse(&fixture).unwrap();
    let receipt = document::first_descendant(doc.root_element(), EBMS_NS, "Receipt");
    let err = engine.validate(receipt).unwrap_err();
    assert_eq!(err.code, ConformanceCode::MissingNonRepudiationInformation);
}
