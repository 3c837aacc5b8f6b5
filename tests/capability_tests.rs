//! Entitlements on references, capabilities and account handles

mod common;

use common::{Harness, ALICE, BOB};
use ore::vm::UserErrorKind;
use ore::ExportedValue;
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

fn setup() -> Harness {
    let harness = Harness::new();
    harness.deploy(ALICE, "Test", TEST).unwrap();
    harness
        .transaction(
            r#"
            import Test from 0x0000000000000001

            transaction {
                prepare(signer: auth(Storage, Capabilities) &Account) {
                    signer.storage.save(<- Test.make(value: 1), to: /storage/r)
                    let cap = signer.capabilities.storage.issue<&Test.R>(/storage/r)
                    signer.capabilities.publish(cap, at: /public/r)
                }
            }
            "#,
            &[],
            &[ALICE],
        )
        .unwrap();
    harness
}

#[test_log::test]
fn test_capability_does_not_grant_more_than_issued() {
    let harness = setup();
    let result = harness
        .script(
            r#"
            import Test from 0x0000000000000001

            fun main(): Bool {
                let r = getAccount(0x0000000000000001)
                    .capabilities.borrow<auth(Test.Mutate) &Test.R>(/public/r)
                return r == nil
            }
            "#,
            &[],
        )
        .unwrap();
    assert_eq!(result, ExportedValue::Bool(true));
}

#[test_log::test]
fn test_entitled_function_needs_entitled_reference() {
    let harness = Harness::new();
    harness.deploy(ALICE, "Test", TEST).unwrap();
    let err = harness
        .script(
            r#"
            import Test from 0x0000000000000001

            fun main() {
                let r <- Test.make(value: 1)
                let ref = &r as &Test.R
                ref.set(2)
                destroy r
            }
            "#,
            &[],
        )
        .unwrap_err();
    assert!(matches!(err.user_kind(), Some(UserErrorKind::AccessDenied { .. })), "{:?}", err);
}

#[test_log::test]
fn test_entitled_reference_can_call_entitled_function() {
    let harness = Harness::new();
    harness.deploy(ALICE, "Test", TEST).unwrap();
    let result = harness
        .script(
            r#"
            import Test from 0x0000000000000001

            fun main(): Int {
                let r <- Test.make(value: 1)
                let ref = &r as auth(Test.Mutate) &Test.R
                ref.set(2)
                let value = r.value
                destroy r
                return value
            }
            "#,
            &[],
        )
        .unwrap();
    assert_eq!(result, ExportedValue::int(2));
}

#[test_log::test]
fn test_public_account_cannot_reach_storage() {
    let harness = setup();
    let err = harness
        .script(
            r#"
            import Test from 0x0000000000000001

            fun main(): Int {
                let r = getAccount(0x0000000000000001).storage.borrow<&Test.R>(from: /storage/r)!
                return r.value
            }
            "#,
            &[],
        )
        .unwrap_err();
    assert!(
        matches!(
            err.user_kind(),
            Some(UserErrorKind::MissingMember { .. } | UserErrorKind::AccessDenied { .. })
        ),
        "{:?}",
        err
    );
}

#[test_log::test]
fn test_signer_needs_the_requested_entitlements() {
    let harness = setup();
    let err = harness
        .transaction(
            r#"
            transaction {
                prepare(signer: auth(Capabilities) &Account) {
                    signer.storage.save(1, to: /storage/one)
                }
            }
            "#,
            &[],
            &[BOB],
        )
        .unwrap_err();
    assert!(
        matches!(
            err.user_kind(),
            Some(UserErrorKind::AccessDenied { .. } | UserErrorKind::MissingMember { .. })
        ),
        "{:?}",
        err
    );
}

#[test_log::test]
fn test_capability_controllers() {
    let harness = setup();
    harness
        .transaction(
            r#"
            import Test from 0x0000000000000001

            transaction {
                prepare(signer: auth(Storage, Capabilities) &Account) {
                    let controllers = signer.capabilities.storage.getControllers(forPath: /storage/r)
                    assert(controllers.length == 1, message: "expected one controller")
                    controllers[0].delete()
                }
            }
            "#,
            &[],
            &[ALICE],
        )
        .unwrap();

    let result = harness
        .script(
            r#"
            import Test from 0x0000000000000001

            fun main(): Bool {
                return getAccount(0x0000000000000001)
                    .capabilities.borrow<&Test.R>(/public/r) == nil
            }
            "#,
            &[],
        )
        .unwrap();
    assert_eq!(result, ExportedValue::Bool(true));
}

#[test_log::test]
fn test_capability_published_over_its_own_path_borrows_nothing() {
    let harness = Harness::new();
    harness
        .transaction(
            r#"
            transaction {
                prepare(signer: auth(Storage, Capabilities) &Account) {
                    signer.storage.save(1, to: /storage/x)
                    signer.link<&Int>(/public/a, target: /storage/x)
                    let cap = signer.getCapability<&Int>(/public/a)
                    signer.unlink(/public/a)
                    signer.capabilities.publish(cap, at: /public/a)
                }
            }
            "#,
            &[],
            &[ALICE],
        )
        .unwrap();

    let result = harness
        .script(
            r#"
            fun main(): Bool {
                return getAccount(0x0000000000000001).capabilities.borrow<&Int>(/public/a) == nil
            }
            "#,
            &[],
        )
        .unwrap();
    assert_eq!(result, ExportedValue::Bool(true));
}

#[test_log::test]
fn test_container_mutators_need_entitled_reference() {
    let harness = Harness::new();
    let err = harness
        .script(
            r#"
            access(all) resource R {}

            fun main() {
                let rs <- [<- create R()]
                let ref = &rs as &[R]
                let r <- ref.remove(at: 0)
                destroy r
                destroy rs
            }
            "#,
            &[],
        )
        .unwrap_err();
    match err.user_kind() {
        Some(UserErrorKind::AccessDenied { member, required }) => {
            assert_eq!(member, "remove");
            assert_eq!(required, "Mutate | Remove");
        }
        other => panic!("unexpected error: {:?}", other),
    }

    let err = harness
        .script(
            r#"
            fun main() {
                let values: {String: Int} = {"b": 2}
                let ref = &values as auth(Remove) &{String: Int}
                ref.insert(key: "a", 1)
            }
            "#,
            &[],
        )
        .unwrap_err();
    assert!(matches!(err.user_kind(), Some(UserErrorKind::AccessDenied { .. })), "{:?}", err);
}

#[test_log::test]
fn test_entitled_reference_can_mutate_container() {
    let harness = Harness::new();
    let result = harness
        .script(
            r#"
            access(all) resource R {}

            fun main(): [Int] {
                let rs <- [<- create R(), <- create R()]
                let remover = &rs as auth(Remove) &[R]
                let r <- remover.removeLast()
                let mutator = &rs as auth(Mutate) &[R]
                mutator.append(<- r)
                mutator.insert(at: 0, <- create R())
                let lengths = [rs.length, mutator.length]
                destroy rs
                return lengths
            }
            "#,
            &[],
        )
        .unwrap();
    assert_eq!(result, ExportedValue::Array(vec![ExportedValue::int(3), ExportedValue::int(3)]));
}

#[test_log::test]
fn test_controller_read_back_from_storage_cannot_delete() {
    let harness = setup();
    harness
        .transaction(
            r#"
            transaction {
                prepare(signer: auth(Storage, Capabilities) &Account) {
                    let controllers = signer.capabilities.storage.getControllers(forPath: /storage/r)
                    signer.storage.save(controllers[0], to: /storage/controller)
                }
            }
            "#,
            &[],
            &[ALICE],
        )
        .unwrap();

    let err = harness
        .transaction(
            r#"
            transaction {
                prepare(signer: auth(Storage) &Account) {
                    let controller = signer.storage.load<StorageCapabilityController>(from: /storage/controller)!
                    controller.delete()
                }
            }
            "#,
            &[],
            &[ALICE],
        )
        .unwrap_err();
    assert!(matches!(err.user_kind(), Some(UserErrorKind::AccessDenied { .. })), "{:?}", err);

    let result = harness
        .script(
            r#"
            import Test from 0x0000000000000001

            fun main(): Int {
                return getAccount(0x0000000000000001)
                    .capabilities.borrow<&Test.R>(/public/r)!.value
            }
            "#,
            &[],
        )
        .unwrap();
    assert_eq!(result, ExportedValue::int(1));
}
