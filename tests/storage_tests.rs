//! Account storage and capabilities across executions

mod common;

use common::{Harness, ALICE, BOB};
use ore::vm::UserErrorKind;
use ore::{ExportedValue, Path, RuntimeConfig};
use pretty_assertions::assert_eq;

const TEST: &str = r#"
access(all) contract Test {
    access(all) entitlement Mutate

    access(all) resource R {
        access(all) var value: Int

        init(value: Int) {
            self.value = value
        }

        access(Mutate) fun set(_ value: Int) {
            self.value = value
        }
    }

    access(all) fun make(value: Int): @R {
        return <- create R(value: value)
    }
}
"#;

const SAVE_AND_PUBLISH: &str = r#"
import Test from 0x0000000000000001

transaction(value: Int) {
    prepare(signer: auth(Storage, Capabilities) &Account) {
        signer.storage.save(<- Test.make(value: value), to: /storage/r)
        let cap = signer.capabilities.storage.issue<&Test.R>(/storage/r)
        signer.capabilities.publish(cap, at: /public/r)
    }
}
"#;

const READ_PUBLIC: &str = r#"
import Test from 0x0000000000000001

fun main(): Int {
    let r = getAccount(0x0000000000000001).capabilities.borrow<&Test.R>(/public/r)
        ?? panic("missing")
    return r.value
}
"#;

fn setup() -> Harness {
    let harness = Harness::new();
    harness.deploy(ALICE, "Test", TEST).unwrap();
    harness
        .transaction(SAVE_AND_PUBLISH, &[ExportedValue::int(42)], &[ALICE])
        .unwrap();
    harness
}

#[test_log::test]
fn test_saved_resource_is_readable_through_capability() {
    let harness = setup();
    assert_eq!(harness.script(READ_PUBLIC, &[]).unwrap(), ExportedValue::int(42));
}

#[test_log::test]
fn test_load_removes_the_stored_resource() {
    let harness = setup();
    harness
        .transaction(
            r#"
            import Test from 0x0000000000000001

            transaction {
                prepare(signer: auth(Storage) &Account) {
                    let r <- signer.storage.load<@Test.R>(from: /storage/r) ?? panic("missing")
                    assert(r.value == 42, message: "unexpected value")
                    destroy r
                }
            }
            "#,
            &[],
            &[ALICE],
        )
        .unwrap();

    assert_eq!(harness.read_stored(ALICE, &Path::storage("r")).unwrap(), None);
    let err = harness.script(READ_PUBLIC, &[]).unwrap_err();
    assert!(matches!(err.user_kind(), Some(UserErrorKind::Panic(_))), "{:?}", err);
}

#[test_log::test]
fn test_saving_twice_to_the_same_path_fails() {
    let harness = setup();
    let err = harness
        .transaction(SAVE_AND_PUBLISH, &[ExportedValue::int(1)], &[ALICE])
        .unwrap_err();
    assert!(matches!(err.user_kind(), Some(UserErrorKind::Overwrite { .. })), "{:?}", err);

    // the failed transaction left the first resource untouched
    assert_eq!(harness.script(READ_PUBLIC, &[]).unwrap(), ExportedValue::int(42));
}

#[test_log::test]
fn test_borrowed_reference_mutates_stored_value() {
    let harness = setup();
    harness
        .transaction(
            r#"
            import Test from 0x0000000000000001

            transaction {
                prepare(signer: auth(Storage) &Account) {
                    let r = signer.storage.borrow<auth(Test.Mutate) &Test.R>(from: /storage/r)
                        ?? panic("missing")
                    r.set(7)
                }
            }
            "#,
            &[],
            &[ALICE],
        )
        .unwrap();
    assert_eq!(harness.script(READ_PUBLIC, &[]).unwrap(), ExportedValue::int(7));
}

#[test_log::test]
fn test_plain_values_round_trip_through_storage() {
    let harness = Harness::new();
    harness
        .transaction(
            r#"
            transaction {
                prepare(signer: auth(Storage) &Account) {
                    let d: {String: [Int]} = {"a": [1, 2, 3]}
                    signer.storage.save(d, to: /storage/d)
                }
            }
            "#,
            &[],
            &[BOB],
        )
        .unwrap();

    let stored = harness.read_stored(BOB, &Path::storage("d")).unwrap();
    assert_eq!(
        stored,
        Some(ExportedValue::Dictionary(vec![(
            ExportedValue::string("a"),
            ExportedValue::Array(vec![ExportedValue::int(1), ExportedValue::int(2), ExportedValue::int(3)]),
        )]))
    );
}

#[test_log::test]
fn test_copy_leaves_value_in_place() {
    let harness = Harness::new();
    harness
        .transaction(
            r#"
            transaction {
                prepare(signer: auth(Storage) &Account) {
                    signer.storage.save("hello", to: /storage/greeting)
                    let copied = signer.storage.copy<String>(from: /storage/greeting)!
                    assert(copied == "hello", message: "copy failed")
                }
            }
            "#,
            &[],
            &[BOB],
        )
        .unwrap();
    assert_eq!(
        harness.read_stored(BOB, &Path::storage("greeting")).unwrap(),
        Some(ExportedValue::string("hello"))
    );
}

#[test_log::test]
fn test_unpublished_capability_cannot_be_borrowed() {
    let harness = setup();
    harness
        .transaction(
            r#"
            transaction {
                prepare(signer: auth(Capabilities) &Account) {
                    signer.capabilities.unpublish(/public/r)
                }
            }
            "#,
            &[],
            &[ALICE],
        )
        .unwrap();
    let err = harness.script(READ_PUBLIC, &[]).unwrap_err();
    assert!(matches!(err.user_kind(), Some(UserErrorKind::Panic(_))), "{:?}", err);
}

#[test_log::test]
fn test_destroy_paged_resource_array_after_reload() {
    let harness = Harness::with_config(RuntimeConfig {
        slab_page_capacity: 4,
        slab_validation_enabled: true,
        ..RuntimeConfig::default()
    });
    harness.deploy(ALICE, "Test", TEST).unwrap();
    harness
        .transaction(
            r#"
            import Test from 0x0000000000000001

            transaction(count: Int) {
                prepare(signer: auth(Storage) &Account) {
                    let rs: @[Test.R] <- []
                    var i = 0
                    while i < count {
                        rs.append(<- Test.make(value: i))
                        i = i + 1
                    }
                    signer.storage.save(<- rs, to: /storage/rs)
                }
            }
            "#,
            &[ExportedValue::int(10)],
            &[ALICE],
        )
        .unwrap();
    match harness.read_stored(ALICE, &Path::storage("rs")).unwrap() {
        Some(ExportedValue::Array(items)) => assert_eq!(items.len(), 10),
        other => panic!("unexpected stored value: {:?}", other),
    }

    harness
        .transaction(
            r#"
            import Test from 0x0000000000000001

            transaction {
                prepare(signer: auth(Storage) &Account) {
                    let rs <- signer.storage.load<@[Test.R]>(from: /storage/rs) ?? panic("missing")
                    destroy rs
                }
            }
            "#,
            &[],
            &[ALICE],
        )
        .unwrap();
    assert_eq!(harness.read_stored(ALICE, &Path::storage("rs")).unwrap(), None);
}
