//! Program cache behaviour across executions

mod common;

use std::sync::Arc;

use common::{address, Harness, ALICE};
use ore::{ExportedValue, Location};
use pretty_assertions::assert_eq;

fn counter(version: i64) -> String {
    format!(
        r#"
        access(all) contract Counter {{
            access(all) fun version(): Int {{
                return {}
            }}
        }}
        "#,
        version
    )
}

const READ_VERSION: &str = r#"
import Counter from 0x0000000000000001

fun main(): Int {
    return Counter.version()
}
"#;

fn counter_location() -> Location {
    Location::address(address(ALICE), "Counter")
}

#[test_log::test]
fn test_imported_programs_are_shared() {
    let harness = Harness::new();
    harness.deploy(ALICE, "Counter", &counter(1)).unwrap();

    assert_eq!(harness.script(READ_VERSION, &[]).unwrap(), ExportedValue::int(1));
    let first = harness.runtime.cache().get(&counter_location()).unwrap().unwrap();
    let hits = harness.runtime.cache().stats().hits;

    assert_eq!(harness.script(READ_VERSION, &[]).unwrap(), ExportedValue::int(1));
    let second = harness.runtime.cache().get(&counter_location()).unwrap().unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert!(harness.runtime.cache().stats().hits > hits);
}

#[test_log::test]
fn test_scripts_are_not_cached() {
    let harness = Harness::new();
    harness
        .script("fun main(): Bool { return true }", &[])
        .unwrap();
    assert_eq!(harness.runtime.cache().stats().entries, 0);
}

#[test_log::test]
fn test_update_is_visible_after_commit() {
    let harness = Harness::new();
    harness.deploy(ALICE, "Counter", &counter(1)).unwrap();
    assert_eq!(harness.script(READ_VERSION, &[]).unwrap(), ExportedValue::int(1));

    harness
        .transaction(
            r#"
            import Counter from 0x0000000000000001

            transaction(code: String) {
                prepare(signer: auth(Contracts) &Account) {
                    signer.contracts.update(name: "Counter", code: code)
                    assert(Counter.version() == 1, message: "update applied before commit")
                }
            }
            "#,
            &[ExportedValue::string(counter(2))],
            &[ALICE],
        )
        .unwrap();

    assert!(harness.interface.invalidated().contains(&counter_location()));
    assert_eq!(harness.script(READ_VERSION, &[]).unwrap(), ExportedValue::int(2));
}

#[test_log::test]
fn test_failed_update_keeps_the_old_program() {
    let harness = Harness::new();
    harness.deploy(ALICE, "Counter", &counter(1)).unwrap();
    let invalidated = harness.interface.invalidated().len();

    let err = harness
        .transaction(
            r#"
            transaction(code: String) {
                prepare(signer: auth(Contracts) &Account) {
                    signer.contracts.update(name: "Counter", code: code)
                    panic("abort")
                }
            }
            "#,
            &[ExportedValue::string(counter(2))],
            &[ALICE],
        )
        .unwrap_err();
    assert!(err.is_user());

    assert_eq!(harness.interface.invalidated().len(), invalidated);
    assert_eq!(harness.script(READ_VERSION, &[]).unwrap(), ExportedValue::int(1));
    assert_eq!(harness.interface.contract(address(ALICE), "Counter"), Some(counter(1)));
}

#[test_log::test]
fn test_deploy_emits_event() {
    let harness = Harness::new();
    harness.deploy(ALICE, "Counter", &counter(1)).unwrap();

    let events = harness.interface.events();
    let added = events
        .iter()
        .find(|event| event.type_id == "flow.AccountContractAdded")
        .expect("contract added event");
    assert_eq!(added.field("contract"), Some(&ExportedValue::string("Counter")));
    assert_eq!(added.field("address"), Some(&ExportedValue::Address(address(ALICE))));
}
